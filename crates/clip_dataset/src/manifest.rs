//! Split manifests: `<split_data>/<split>.txt`, one `<clip_dir> <label>` per line.

use crate::types::{ClipDatasetError, ClipIndex, DatasetResult, Split};
use std::fs;
use std::path::{Path, PathBuf};

pub fn manifest_path(split_data: &Path, split: Split) -> PathBuf {
    split_data.join(format!("{}.txt", split.as_str()))
}

/// Reads the manifest for `split`, joining clip directories onto `root`.
pub fn read_split_manifest(
    root: &Path,
    split_data: &Path,
    split: Split,
    num_classes: usize,
) -> DatasetResult<Vec<ClipIndex>> {
    let path = manifest_path(split_data, split);
    let raw = fs::read_to_string(&path).map_err(|e| ClipDatasetError::Io {
        path: path.clone(),
        source: e,
    })?;
    parse_manifest(&raw, &path, root, num_classes)
}

pub fn parse_manifest(
    raw: &str,
    path: &Path,
    root: &Path,
    num_classes: usize,
) -> DatasetResult<Vec<ClipIndex>> {
    let mut clips = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = |msg: String| ClipDatasetError::Manifest {
            path: path.to_path_buf(),
            line: i + 1,
            msg,
        };
        // Label is the last field so clip paths may contain spaces.
        let (clip, label) = line
            .rsplit_once(char::is_whitespace)
            .ok_or_else(|| err(format!("expected `<clip_dir> <label>`, got {line:?}")))?;
        let clip = clip.trim();
        if clip.is_empty() {
            return Err(err("empty clip path".to_string()));
        }
        let label: usize = label
            .parse()
            .map_err(|_| err(format!("label {label:?} is not a class id")))?;
        if label >= num_classes {
            return Err(err(format!(
                "label {label} out of range for {num_classes} classes"
            )));
        }
        clips.push(ClipIndex {
            clip_dir: root.join(clip),
            label,
        });
    }
    Ok(clips)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_comments_and_blank_lines() {
        let raw = "# clips\nwalk/v01_c01 0\n\nrun/v02 c03 6\n";
        let clips = parse_manifest(raw, Path::new("train.txt"), Path::new("/data"), 7).unwrap();
        assert_eq!(
            clips,
            vec![
                ClipIndex {
                    clip_dir: PathBuf::from("/data/walk/v01_c01"),
                    label: 0
                },
                ClipIndex {
                    clip_dir: PathBuf::from("/data/run/v02 c03"),
                    label: 6
                },
            ]
        );
    }

    #[test]
    fn rejects_out_of_range_label() {
        let err = parse_manifest("a 7\n", Path::new("val.txt"), Path::new("."), 7).unwrap_err();
        match err {
            ClipDatasetError::Manifest { line, msg, .. } => {
                assert_eq!(line, 1);
                assert!(msg.contains("out of range"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_line_without_label() {
        assert!(parse_manifest("lonely\n", Path::new("val.txt"), Path::new("."), 7).is_err());
        assert!(parse_manifest("clip x\n", Path::new("val.txt"), Path::new("."), 7).is_err());
    }
}
