/// Log file discovery.  Arguments may be files, taken as given, or directories, walked
/// recursively in sorted order so a run over a capture tree is reproducible.  The core itself
/// never touches the file system beyond this and the per-file reads; everything downstream works
/// on line streams.
use anyhow::Result;
use std::fs;
use std::path::Path;

pub fn find_logfiles(paths: &[String]) -> Result<Vec<String>> {
    let mut files = vec![];
    for p in paths {
        let md = fs::metadata(p)?;
        if md.is_dir() {
            walk(Path::new(p), &mut files)?;
        } else {
            files.push(p.clone());
        }
    }
    Ok(files)
}

fn walk(dir: &Path, out: &mut Vec<String>) -> Result<()> {
    let mut entries = vec![];
    for e in fs::read_dir(dir)? {
        entries.push(e?.path());
    }
    entries.sort();
    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            walk(&path, out)?;
        } else if wanted(name) {
            out.push(path.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

// The extensions capture rigs actually produce; extensionless files are common too.

fn wanted(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => matches!(ext.to_ascii_lowercase().as_str(), "log" | "txt" | "out"),
        None => true,
    }
}

// This tests:
//  - the extension filter, including extensionless names and case

#[test]
fn test_wanted() {
    assert!(wanted("capture.log"));
    assert!(wanted("capture.TXT"));
    assert!(wanted("console.out"));
    assert!(wanted("serial_dump"));
    assert!(!wanted("report.html"));
    assert!(!wanted("symbols.map"));
}

// This tests:
//  - recursive discovery in sorted order, skipping dotfiles and unwanted extensions

#[test]
fn test_find_logfiles() {
    let dir = std::env::temp_dir().join(format!("ecualyze-files-{}", std::process::id()));
    let sub = dir.join("sub");
    std::fs::create_dir_all(&sub).unwrap();
    std::fs::write(dir.join("b.log"), "x").unwrap();
    std::fs::write(dir.join("a.log"), "x").unwrap();
    std::fs::write(dir.join(".hidden.log"), "x").unwrap();
    std::fs::write(dir.join("notes.html"), "x").unwrap();
    std::fs::write(sub.join("c.txt"), "x").unwrap();

    let found = find_logfiles(&[dir.to_string_lossy().into_owned()]).unwrap();
    let names = found
        .iter()
        .map(|f| Path::new(f).file_name().unwrap().to_str().unwrap())
        .collect::<Vec<&str>>();
    assert!(names == vec!["a.log", "b.log", "c.txt"]);

    let _ = std::fs::remove_dir_all(&dir);
}
