/// Find and read the capture files named on the command line.
///
/// A path is either a file, which is taken as is, or a directory, which is scanned (not
/// recursively) for `*.nmon` and `*.nmon.gz` files.  Files are imported in sorted order.
///
/// A `.gz` file is decompressed while reading.  The checksum is SHA-256 over the capture bytes
/// after decompression and before any text decoding, so recompressing a file does not make it look
/// changed.
use anyhow::{bail, Result};
use flate2::read::GzDecoder;
use nmonlog::SourceFile;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

pub fn expand_paths(paths: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for p in paths {
        let path = Path::new(p);
        if path.is_dir() {
            let mut found = vec![];
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let candidate = entry.path();
                if candidate.is_file() && is_capture_name(&candidate) {
                    found.push(candidate);
                }
            }
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.to_path_buf());
        } else {
            bail!("No such file or directory: {p}");
        }
    }
    Ok(files)
}

fn is_capture_name(path: &Path) -> bool {
    match path.file_name().and_then(|s| s.to_str()) {
        Some(name) => name.ends_with(".nmon") || name.ends_with(".nmon.gz"),
        None => false,
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn load(path: &Path) -> Result<SourceFile> {
    let raw = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => bail!("Could not read {}: {e}", path.display()),
    };
    let bytes = if is_compressed(path) {
        let mut decoded = vec![];
        if let Err(e) = GzDecoder::new(&raw[..]).read_to_end(&mut decoded) {
            bail!("Could not decompress {}: {e}", path.display());
        }
        decoded
    } else {
        raw
    };
    let text = String::from_utf8_lossy(&bytes);
    let file = SourceFile::new(&path.to_string_lossy(), &text, &checksum(&bytes));
    tracing::debug!(
        "Loaded {}: {} lines, checksum {}",
        file.name,
        file.lines.len(),
        file.checksum
    );
    Ok(file)
}

#[cfg(test)]
use flate2::{write::GzEncoder, Compression};
#[cfg(test)]
use std::io::Write;

#[cfg(test)]
fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nmonimport-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_checksum() {
    assert!(
        checksum(b"abc") == "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_expand_paths() {
    let dir = scratch_dir("expand");
    for name in ["b.nmon", "a.nmon.gz", "notes.txt", "c.nmon.bak"] {
        fs::write(dir.join(name), "AAA,host,h1\n").unwrap();
    }
    fs::create_dir(dir.join("sub.nmon")).unwrap();

    let single = dir.join("notes.txt");
    let files = expand_paths(&[
        dir.to_string_lossy().to_string(),
        single.to_string_lossy().to_string(),
    ])
    .unwrap();
    let names = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect::<Vec<String>>();
    // Explicitly named files are taken whatever their name
    assert!(names == vec!["a.nmon.gz", "b.nmon", "notes.txt"]);

    assert!(expand_paths(&[dir.join("nope.nmon").to_string_lossy().to_string()]).is_err());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_load_plain_and_compressed() {
    let dir = scratch_dir("load");
    let text = "AAA;host;h1\nZZZZ;T0001;18:30:17;06-NOV-2022\n";

    let plain = dir.join("h1.nmon");
    fs::write(&plain, text).unwrap();

    let packed = dir.join("h1.nmon.gz");
    let mut enc = GzEncoder::new(vec![], Compression::default());
    enc.write_all(text.as_bytes()).unwrap();
    fs::write(&packed, enc.finish().unwrap()).unwrap();

    let a = load(&plain).unwrap();
    let b = load(&packed).unwrap();
    assert!(a.lines.len() == 2);
    assert!(a.delimiter == ';');
    assert!(a.lines == b.lines);
    assert!(a.checksum == b.checksum);
    assert!(a.checksum == checksum(text.as_bytes()));
    assert!(a.basename() == "h1.nmon");
    assert!(b.basename() == "h1.nmon.gz");

    fs::write(&packed, "not gzip").unwrap();
    assert!(load(&packed).is_err());
    assert!(load(&dir.join("missing.nmon")).is_err());
    fs::remove_dir_all(&dir).unwrap();
}
