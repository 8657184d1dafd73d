//! クラス別フォルダの走査
//!
//! ルートディレクトリ直下のサブディレクトリ名をラベルとして、
//! その中のファイルを (パス, ラベル) のサンプル一覧に変換します。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 画像1枚分のサンプル
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// 画像ファイルの絶対パス
    pub image_path: String,
    /// 親ディレクトリ名から得たラベル
    pub label: String,
}

/// ルート直下の各サブディレクトリ内の全ファイルを列挙
pub fn scan_directory(root: &Path) -> Result<Vec<Sample>> {
    scan(root, None)
}

/// 拡張子を限定して走査（大文字小文字は区別しない）
pub fn scan_directory_with_extensions(root: &Path, extensions: &[String]) -> Result<Vec<Sample>> {
    let extensions: Vec<String> = extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();
    scan(root, Some(&extensions))
}

/// ラベルごとのサンプル数
pub fn class_counts(samples: &[Sample]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for sample in samples {
        *counts.entry(sample.label.clone()).or_insert(0) += 1;
    }
    counts
}

fn scan(root: &Path, extensions: Option<&[String]>) -> Result<Vec<Sample>> {
    let root = fs::canonicalize(root).map_err(|e| Error::io(root, e))?;

    let mut samples = Vec::new();
    for class_dir in sorted_entries(&root)? {
        if !class_dir.is_dir() {
            continue;
        }

        let Some(label) = utf8_name(&class_dir) else {
            warn!("UTF-8でないディレクトリ名をスキップ: {}", class_dir.display());
            continue;
        };

        let before = samples.len();
        for path in sorted_entries(&class_dir)? {
            if !path.is_file() || !extension_allowed(&path, extensions) {
                continue;
            }
            let Some(image_path) = path.to_str() else {
                warn!("UTF-8でないファイル名をスキップ: {}", path.display());
                continue;
            };
            samples.push(Sample {
                image_path: image_path.to_string(),
                label: label.to_string(),
            });
        }
        debug!("クラス '{}': {} ファイル", label, samples.len() - before);
    }

    info!("{} から {} サンプルを検出しました", root.display(), samples.len());
    Ok(samples)
}

fn utf8_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// ディレクトリ内のエントリを名前順で返す
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn extension_allowed(path: &Path, extensions: Option<&[String]>) -> bool {
    let Some(extensions) = extensions else {
        return true;
    };
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|allowed| *allowed == ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_tree(classes: &[(&str, usize)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (class, count) in classes {
            let class_dir = dir.path().join(class);
            fs::create_dir_all(&class_dir).unwrap();
            for i in 0..*count {
                fs::write(class_dir.join(format!("{i:02}.jpg")), [i as u8]).unwrap();
            }
        }
        dir
    }

    #[test]
    fn test_scan_counts_and_labels() {
        let dir = make_tree(&[("cat", 3), ("dog", 5), ("bird", 0)]);
        let samples = scan_directory(dir.path()).unwrap();

        assert_eq!(samples.len(), 8);
        for sample in &samples {
            let parent = Path::new(&sample.image_path)
                .parent()
                .and_then(|p| p.file_name())
                .unwrap()
                .to_string_lossy()
                .to_string();
            assert_eq!(parent, sample.label);
            assert!(Path::new(&sample.image_path).is_absolute());
        }

        let counts = class_counts(&samples);
        assert_eq!(counts.get("cat"), Some(&3));
        assert_eq!(counts.get("dog"), Some(&5));
        assert_eq!(counts.get("bird"), None);
    }

    #[test]
    fn test_scan_ignores_root_files_and_nested_dirs() {
        let dir = make_tree(&[("cat", 2)]);
        fs::write(dir.path().join("README.txt"), "x").unwrap();
        let nested = dir.path().join("cat").join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("deep.jpg"), "x").unwrap();

        let samples = scan_directory(dir.path()).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| !s.image_path.contains("nested")));
    }

    #[test]
    fn test_scan_is_ordered() {
        let dir = make_tree(&[("b", 2), ("a", 2)]);
        let samples = scan_directory(dir.path()).unwrap();
        let labels: Vec<&str> = samples.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "a", "b", "b"]);
    }

    #[test]
    fn test_scan_with_extensions() {
        let dir = make_tree(&[("cat", 2)]);
        fs::write(dir.path().join("cat").join("notes.TXT"), "x").unwrap();
        fs::write(dir.path().join("cat").join("upper.PNG"), "x").unwrap();

        let samples =
            scan_directory_with_extensions(dir.path(), &["jpg".to_string(), ".png".to_string()])
                .unwrap();
        assert_eq!(samples.len(), 3);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scan_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = make_tree(&[("cat", 2)]);
        let bad_name = OsStr::from_bytes(b"bad\xff");
        let bad_dir = dir.path().join(bad_name);
        fs::create_dir_all(&bad_dir).unwrap();
        fs::write(bad_dir.join("00.jpg"), "x").unwrap();
        fs::write(dir.path().join("cat").join(bad_name), "x").unwrap();

        let samples = scan_directory(dir.path()).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.label == "cat"));
        assert!(samples.iter().all(|s| Path::new(&s.image_path).exists()));
    }

    #[test]
    fn test_scan_missing_root() {
        let dir = TempDir::new().unwrap();
        let result = scan_directory(&dir.path().join("missing"));
        assert!(matches!(result, Err(Error::Io { .. })));
    }
}
