//! ファイルI/Oユーティリティ（gzip対応）

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::Path;

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    let ext = p.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();

    if ext == "gz" {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// 追記モードで開く。親ディレクトリがなければ作る。
pub fn open_append<P: AsRef<Path>>(path: P) -> io::Result<File> {
    let p = path.as_ref();
    if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).read(true).open(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_plain_and_gzip_transparently() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("positions.txt");
        std::fs::write(&plain, "a\nb\n").unwrap();

        let gz = dir.path().join("positions.txt.gz");
        let mut enc =
            flate2::write::GzEncoder::new(File::create(&gz).unwrap(), flate2::Compression::fast());
        enc.write_all(b"a\nb\n").unwrap();
        enc.finish().unwrap();

        for path in [&plain, &gz] {
            let lines: Vec<String> = open_reader(path).unwrap().lines().map(|l| l.unwrap()).collect();
            assert_eq!(lines, vec!["a", "b"]);
        }
    }

    #[test]
    fn open_append_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs/selfplay/out.txt");
        writeln!(open_append(&path).unwrap(), "one").unwrap();
        writeln!(open_append(&path).unwrap(), "two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
