//! Directory ingestion sink: each submission becomes `<out>/<artifact_id>.json`
//! plus `<out>/<artifact_id>.properties.json`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use serde_json::{Map, Value};

use crate::error::SinkError;
use crate::grid::CropGrid;
use crate::provider::{IngestionSink, JobHandle};

#[derive(Debug)]
pub struct DirectorySink {
    out: PathBuf,
    submitted: AtomicUsize,
}

impl DirectorySink {
    pub fn new(out: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let out = out.into();
        fs::create_dir_all(&out).map_err(|source| SinkError::Write {
            path: out.clone(),
            source,
        })?;
        Ok(Self {
            out,
            submitted: AtomicUsize::new(0),
        })
    }

    pub fn artifact_path(&self, artifact_id: &str) -> PathBuf {
        self.out.join(format!("{artifact_id}.json"))
    }

    pub fn properties_path(&self, artifact_id: &str) -> PathBuf {
        self.out.join(format!("{artifact_id}.properties.json"))
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), SinkError> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    fs::write(path, text).map_err(|source| SinkError::Write {
        path: path.to_path_buf(),
        source,
    })
}

impl IngestionSink for DirectorySink {
    fn exists(&self, artifact_id: &str) -> bool {
        self.artifact_path(artifact_id).is_file()
    }

    fn submit(
        &self,
        artifact_id: &str,
        artifact: &CropGrid,
        properties: &Map<String, Value>,
    ) -> Result<JobHandle, SinkError> {
        write_json(&self.artifact_path(artifact_id), artifact)?;
        write_json(&self.properties_path(artifact_id), properties)?;
        let seq = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = JobHandle {
            id: format!("job-{seq:06}"),
            artifact_id: artifact_id.to_string(),
            submitted: chrono::Utc::now().to_rfc3339(),
        };
        tracing::info!(target: "croptype::sink", job = %handle.id, artifact_id, "submitted");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submit_writes_artifact_and_properties() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("out")).unwrap();
        let mut props = Map::new();
        props.insert("tile".into(), json!("10S"));

        assert!(!sink.exists("10S_2014"));
        let handle = sink.submit("10S_2014", &CropGrid::new(1, 1, 47), &props).unwrap();
        assert_eq!(handle.id, "job-000001");
        assert_eq!(handle.artifact_id, "10S_2014");
        assert!(sink.exists("10S_2014"));

        let written: Map<String, Value> =
            serde_json::from_str(&fs::read_to_string(sink.properties_path("10S_2014")).unwrap()).unwrap();
        assert_eq!(written["tile"], json!("10S"));
        let grid: CropGrid =
            serde_json::from_str(&fs::read_to_string(sink.artifact_path("10S_2014")).unwrap()).unwrap();
        assert_eq!(grid.get(0, 0), 47);

        let second = sink.submit("10S_2015", &CropGrid::new(1, 1, 0), &props).unwrap();
        assert_eq!(second.id, "job-000002");
        assert_eq!(sink.submitted(), 2);
    }
}
