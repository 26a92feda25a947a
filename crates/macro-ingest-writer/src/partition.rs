//! Partition path generation
//!
//! Hive-style layout, one directory per `(layer, source, dataset, extract_date)`:
//!
//! ```text
//! {root}/bronze/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/payload-{hash16}.json
//! {root}/bronze/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/manifest-{hash16}.json
//! {root}/silver/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/silver-{fp16}.parquet
//! {root}/gold/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/gold-{fp16}.parquet
//! {root}/manifests/stage=transform/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/{run_id}.json
//! ```
//!
//! File names carry a hash prefix, so identical content maps to the same path.

use std::fmt;

use chrono::NaiveDate;
use macro_ingest_core::hash::short_hash;
use macro_ingest_core::{DatasetRef, Stage};

pub const PAYLOAD_PREFIX: &str = "payload-";
pub const MANIFEST_PREFIX: &str = "manifest-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Bronze => "bronze",
            Layer::Silver => "silver",
            Layer::Gold => "gold",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path builder bound to one storage root (`S3_PREFIX_ROOT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    root: String,
}

impl PartitionLayout {
    pub fn new(prefix_root: &str) -> Self {
        let cleaned = sanitize_path(prefix_root);
        let root = if cleaned.is_empty() {
            String::new()
        } else {
            format!("{cleaned}/")
        };
        Self { root }
    }

    /// `{root}/{layer}/source=…/dataset=…/` (trailing slash, suitable for listing)
    pub fn dataset_dir(&self, layer: Layer, dataset: &DatasetRef) -> String {
        format!(
            "{}{}/source={}/dataset={}/",
            self.root, layer, dataset.source, dataset.dataset
        )
    }

    pub fn partition_dir(&self, layer: Layer, dataset: &DatasetRef, extract_date: NaiveDate) -> String {
        format!(
            "{}extract_date={}/",
            self.dataset_dir(layer, dataset),
            extract_date.format("%Y-%m-%d")
        )
    }

    pub fn payload_path(&self, dataset: &DatasetRef, extract_date: NaiveDate, payload_hash: &str) -> String {
        format!(
            "{}{}{}.json",
            self.partition_dir(Layer::Bronze, dataset, extract_date),
            PAYLOAD_PREFIX,
            short_hash(payload_hash)
        )
    }

    pub fn manifest_path(&self, dataset: &DatasetRef, extract_date: NaiveDate, payload_hash: &str) -> String {
        format!(
            "{}{}{}.json",
            self.partition_dir(Layer::Bronze, dataset, extract_date),
            MANIFEST_PREFIX,
            short_hash(payload_hash)
        )
    }

    /// Parquet object for the silver or gold layer.
    pub fn frame_path(
        &self,
        layer: Layer,
        dataset: &DatasetRef,
        extract_date: NaiveDate,
        fingerprint: &str,
    ) -> String {
        format!(
            "{}{}-{}.parquet",
            self.partition_dir(layer, dataset, extract_date),
            layer,
            short_hash(fingerprint)
        )
    }

    pub fn stage_manifest_dir(&self, stage: Stage, dataset: &DatasetRef) -> String {
        format!(
            "{}manifests/stage={}/source={}/dataset={}/",
            self.root, stage, dataset.source, dataset.dataset
        )
    }

    pub fn stage_manifest_path(
        &self,
        stage: Stage,
        dataset: &DatasetRef,
        extract_date: NaiveDate,
        run_id: &str,
    ) -> String {
        format!(
            "{}extract_date={}/{}.json",
            self.stage_manifest_dir(stage, dataset),
            extract_date.format("%Y-%m-%d"),
            sanitize_file_stem(run_id)
        )
    }
}

/// Keep `a-z0-9-_.`; anything else becomes `_`.
fn sanitize_file_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Like [`sanitize_file_stem`] per segment, dropping empty and dot segments.
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .map(sanitize_file_stem)
        .collect::<Vec<_>>()
        .join("/")
}

/// Date of the `extract_date=YYYY-MM-DD` segment in `path`, if there is one.
pub fn extract_date_of(path: &str) -> Option<NaiveDate> {
    path.split('/')
        .find_map(|segment| segment.strip_prefix("extract_date="))
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
}

/// File name of an object path (text after the last `/`).
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 4).unwrap()
    }

    fn dataset() -> DatasetRef {
        DatasetRef::bea("Regional", "SQPCE")
    }

    const HASH: &str = "deadbeefdeadbeef0123456789abcdef";

    #[test]
    fn bronze_paths() {
        let layout = PartitionLayout::new("staging");
        assert_eq!(
            layout.payload_path(&dataset(), date(), HASH),
            "staging/bronze/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/payload-deadbeefdeadbeef.json"
        );
        assert_eq!(
            file_name(&layout.manifest_path(&dataset(), date(), HASH)),
            "manifest-deadbeefdeadbeef.json"
        );
    }

    #[test]
    fn frame_and_stage_manifest_paths() {
        let layout = PartitionLayout::new("/prod/");
        assert_eq!(
            layout.frame_path(Layer::Gold, &dataset(), date(), HASH),
            "prod/gold/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/gold-deadbeefdeadbeef.parquet"
        );
        assert_eq!(
            layout.stage_manifest_path(Stage::Load, &dataset(), date(), "run-1"),
            "prod/manifests/stage=load/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/run-1.json"
        );
    }

    #[test]
    fn extract_date_is_read_back_from_paths() {
        let layout = PartitionLayout::new("staging");
        assert_eq!(
            extract_date_of(&layout.manifest_path(&dataset(), date(), HASH)),
            Some(date())
        );
        assert_eq!(
            extract_date_of(&layout.stage_manifest_path(Stage::Load, &dataset(), date(), "run-1")),
            Some(date())
        );
        assert_eq!(extract_date_of("staging/bronze/extract_date=soon/x.json"), None);
        assert_eq!(extract_date_of("staging/bronze/x.json"), None);
    }

    #[test]
    fn empty_root_has_no_leading_slash() {
        let layout = PartitionLayout::new("");
        assert!(layout
            .dataset_dir(Layer::Silver, &dataset())
            .starts_with("silver/source=bea/"));
    }

    #[test]
    fn run_ids_cannot_escape_their_directory() {
        let layout = PartitionLayout::new("staging");
        let path = layout.stage_manifest_path(Stage::Transform, &dataset(), date(), "../../etc/passwd");
        assert_eq!(file_name(&path), ".._.._etc_passwd.json");
        assert!(!path.contains("/../"));
        assert_eq!(PartitionLayout::new("a/../b").root, "a/b/");
    }
}
