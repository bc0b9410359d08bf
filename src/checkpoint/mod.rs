//! The Checkpoint Manager (spec §4.9): versioned save/load/compare/cleanup
//! over a `NetworkWrapper`'s weights, with performance-ranked retention
//! and a single "best" pointer.
//!
//! The teacher carries no persistence layer at all (its `DQNAgent` never
//! saves), so this module is grounded in the broader pack's
//! checkpoint/training code instead — `other_examples`'s `rl_store.rs`
//! (gzip-compressed `bincode` payloads written to their own file) and the
//! `ploy`/`Umpire` trainers that pair a binary weight file with a
//! metadata blob. Rather than writing two files, the composite layout
//! described in spec §6 ("header, weight payload, metadata blob" in one
//! file) is framed here directly: a length-prefixed `bincode` header, the
//! weight payload `NetworkWrapper::to_bytes` produces (optionally
//! gzipped), then a `serde_json` metadata blob to end of file.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use burn::tensor::backend::AutodiffBackend;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ordered_float::NotNan;
use serde::{Deserialize, Serialize};

use crate::codec::{ACTION_SPACE, STATE_FEATURES};
use crate::error::{EngineError, EngineResult};
use crate::network::{DqnModel, NetworkWrapper};

/// Bumped whenever the on-disk framing (header/payload/metadata layout)
/// changes incompatibly. Spec §6: "compatibility across revisions is not
/// required but MUST be detected and refused."
const CHECKPOINT_FORMAT_VERSION: u32 = 1;
const MAGIC: [u8; 4] = *b"RLCP";

/// Lifecycle stamp of one checkpoint's weight payload (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    Skipped,
    Pending,
}

/// The metadata blob carried in every checkpoint, verbatim across
/// save/load (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub cycle: usize,
    pub performance: f64,
    pub description: String,
    pub is_best: bool,
    #[serde(default)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

/// Everything the manager knows about one stored checkpoint (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub version: u32,
    pub path: PathBuf,
    pub metadata: CheckpointMetadata,
    pub creation_time: chrono::DateTime<chrono::Utc>,
    pub file_size: u64,
    pub validation_status: ValidationStatus,
}

impl CheckpointInfo {
    fn performance_key(&self) -> NotNan<f64> {
        NotNan::new(self.metadata.performance).unwrap_or(NotNan::new(f64::MIN).unwrap())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointHeader {
    magic: [u8; 4],
    format_version: u32,
    state_features: u32,
    action_space: u32,
    compressed: bool,
}

/// A `compare` result (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointComparison {
    pub delta: f64,
    pub percent_improvement: f64,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    MajorImprovement,
    Improvement,
    SlightImprovement,
    NoSignificantChange,
    SlightRegression,
    Regression,
}

fn bucket_recommendation(percent: f64) -> Recommendation {
    if percent > 10.0 {
        Recommendation::MajorImprovement
    } else if percent > 5.0 {
        Recommendation::Improvement
    } else if percent > 1.0 {
        Recommendation::SlightImprovement
    } else if percent >= -1.0 {
        Recommendation::NoSignificantChange
    } else if percent >= -5.0 {
        Recommendation::SlightRegression
    } else {
        Recommendation::Regression
    }
}

/// Versioned checkpoint store: `create`/`load`/`compare`/`cleanup` over a
/// `NetworkWrapper`'s weights (spec §4.9).
pub struct CheckpointManager<B, M, const D: usize>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D>,
{
    base_directory: PathBuf,
    max_versions: usize,
    compression: bool,
    validation_enabled: bool,
    checkpoints: HashMap<u32, CheckpointInfo>,
    best: Option<u32>,
    created: u64,
    loaded: u64,
    deleted: u64,
    _marker: std::marker::PhantomData<fn() -> (B, M)>,
}

impl<B, M, const D: usize> CheckpointManager<B, M, D>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D>,
{
    pub fn new(
        base_directory: impl Into<PathBuf>,
        max_versions: usize,
        compression: bool,
        validation_enabled: bool,
    ) -> Self {
        Self {
            base_directory: base_directory.into(),
            max_versions: max_versions.max(1),
            compression,
            validation_enabled,
            checkpoints: HashMap::new(),
            best: None,
            created: 0,
            loaded: 0,
            deleted: 0,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn created_count(&self) -> u64 {
        self.created
    }

    pub fn loaded_count(&self) -> u64 {
        self.loaded
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted
    }

    pub fn best(&self) -> Option<&CheckpointInfo> {
        self.best.and_then(|v| self.checkpoints.get(&v))
    }

    pub fn get(&self, version: u32) -> Option<&CheckpointInfo> {
        self.checkpoints.get(&version)
    }

    /// All live checkpoints, most recent version first.
    pub fn list(&self) -> Vec<&CheckpointInfo> {
        let mut infos: Vec<&CheckpointInfo> = self.checkpoints.values().collect();
        infos.sort_by(|a, b| b.version.cmp(&a.version));
        infos
    }

    fn path_for(&self, version: u32, cycle: usize, timestamp: i64) -> PathBuf {
        let ext = if self.compression { "compressed" } else { "plain" };
        self.base_directory
            .join(format!("checkpoint_v{version}_c{cycle}_{timestamp}.{ext}"))
    }

    /// Serialize `agent`'s weights plus `metadata` to a new versioned
    /// checkpoint file, updating the best pointer and triggering cleanup
    /// when retention is exceeded (spec §4.9).
    pub fn create(
        &mut self,
        agent: &NetworkWrapper<B, M, D>,
        version: u32,
        metadata: CheckpointMetadata,
    ) -> EngineResult<CheckpointInfo> {
        fs::create_dir_all(&self.base_directory)?;

        let timestamp = chrono_timestamp();
        let path = self.path_for(version, metadata.cycle, timestamp);

        let weights = agent.to_bytes()?;
        let weights = if self.compression {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&weights)?;
            encoder.finish()?
        } else {
            weights
        };

        let header = CheckpointHeader {
            magic: MAGIC,
            format_version: CHECKPOINT_FORMAT_VERSION,
            state_features: STATE_FEATURES as u32,
            action_space: ACTION_SPACE as u32,
            compressed: self.compression,
        };
        let header_bytes = bincode::serialize(&header)?;
        let metadata_bytes = serde_json::to_vec(&metadata)?;

        let mut file = fs::File::create(&path)?;
        file.write_all(&(header_bytes.len() as u64).to_le_bytes())?;
        file.write_all(&header_bytes)?;
        file.write_all(&(weights.len() as u64).to_le_bytes())?;
        file.write_all(&weights)?;
        file.write_all(&metadata_bytes)?;
        drop(file);

        let file_size = fs::metadata(&path)?.len();

        let validation_status = if self.validation_enabled {
            match self.validate_file(&path, agent) {
                Ok(()) => ValidationStatus::Valid,
                Err(_) => ValidationStatus::Invalid,
            }
        } else {
            ValidationStatus::Skipped
        };

        let is_best = metadata.is_best
            || self
                .best()
                .map(|b| metadata.performance > b.metadata.performance)
                .unwrap_or(true);

        let info = CheckpointInfo {
            version,
            path,
            metadata,
            creation_time: chrono::Utc::now(),
            file_size,
            validation_status,
        };

        self.checkpoints.insert(version, info.clone());
        self.created += 1;
        if is_best {
            self.best = Some(version);
        }
        log::info!(
            "checkpoint v{version} created at cycle {} (performance {:.4}, best: {is_best})",
            info.metadata.cycle,
            info.metadata.performance
        );
        if validation_status == ValidationStatus::Invalid {
            log::warn!("checkpoint v{version} failed integrity validation on write");
        }

        if self.checkpoints.len() > self.max_versions {
            self.cleanup()?;
        }

        Ok(info)
    }

    /// Re-read a just-written file into a throwaway clone of `agent`,
    /// purely to confirm the payload parses back with matching shapes
    /// before trusting `ValidationStatus::Valid` (spec §4.9 "optionally
    /// run integrity validation").
    fn validate_file(&self, path: &PathBuf, agent: &NetworkWrapper<B, M, D>) -> EngineResult<()> {
        let mut probe = agent.clone();
        let (_header, weights, _metadata) = read_checkpoint_file(path)?;
        probe.load_bytes(weights)
    }

    /// Restore `info`'s weights into `online`, validating the header
    /// first. When `target` is supplied it is synced from `online`
    /// immediately after, per spec §4.5 ("loading a checkpoint into the
    /// online wrapper MUST be followed by a copy into the target
    /// wrapper").
    pub fn load(
        &mut self,
        info: &CheckpointInfo,
        online: &mut NetworkWrapper<B, M, D>,
        target: Option<&mut NetworkWrapper<B, M, D>>,
    ) -> EngineResult<()> {
        let (_header, weights, _metadata) = read_checkpoint_file(&info.path)?;
        online.load_bytes(weights)?;
        if let Some(target) = target {
            online.copy_weights_to(target);
        }
        self.loaded += 1;
        log::info!("restored checkpoint v{} from {:?}", info.version, info.path);
        Ok(())
    }

    /// Performance delta, percent improvement, and a bucketed
    /// recommendation between two live checkpoints (spec §4.9).
    pub fn compare(&self, v1: u32, v2: u32) -> EngineResult<CheckpointComparison> {
        let a = self
            .checkpoints
            .get(&v1)
            .ok_or_else(|| EngineError::InvalidConfiguration(format!("no checkpoint v{v1}")))?;
        let b = self
            .checkpoints
            .get(&v2)
            .ok_or_else(|| EngineError::InvalidConfiguration(format!("no checkpoint v{v2}")))?;

        let delta = b.metadata.performance - a.metadata.performance;
        let percent = if a.metadata.performance.abs() > f64::EPSILON {
            delta / a.metadata.performance.abs() * 100.0
        } else if delta == 0.0 {
            0.0
        } else {
            delta.signum() * 100.0
        };

        Ok(CheckpointComparison {
            delta,
            percent_improvement: percent,
            recommendation: bucket_recommendation(percent),
        })
    }

    /// Retain the top-`max_versions` live checkpoints by performance,
    /// always deleting invalid entries and never deleting the best
    /// pointer's target (spec §4.9). Returns the number removed.
    pub fn cleanup(&mut self) -> EngineResult<usize> {
        let best = self.best;

        let mut keep: Vec<u32> = self
            .checkpoints
            .values()
            .filter(|c| c.validation_status != ValidationStatus::Invalid)
            .map(|c| c.version)
            .collect();
        keep.sort_by_key(|v| std::cmp::Reverse(self.checkpoints[v].performance_key()));
        keep.truncate(self.max_versions);
        if let Some(b) = best {
            if self.checkpoints.contains_key(&b) && !keep.contains(&b) {
                keep.push(b);
            }
        }
        let keep: std::collections::HashSet<u32> = keep.into_iter().collect();

        let to_remove: Vec<u32> = self
            .checkpoints
            .keys()
            .filter(|v| !keep.contains(v))
            .copied()
            .collect();

        let mut removed = 0;
        for version in to_remove {
            if let Some(info) = self.checkpoints.get(&version) {
                // Deletion failure (e.g. file already gone) does not
                // corrupt the map: we still drop the in-memory entry
                // since the checkpoint is no longer considered live,
                // but a failed `remove_file` is not itself propagated.
                let _ = fs::remove_file(&info.path);
            }
            self.checkpoints.remove(&version);
            self.deleted += 1;
            removed += 1;
        }

        if let Some(b) = self.best {
            if !self.checkpoints.contains_key(&b) {
                self.best = self
                    .checkpoints
                    .values()
                    .max_by_key(|c| c.performance_key())
                    .map(|c| c.version);
            }
        }

        if removed > 0 {
            log::info!("cleanup retired {removed} checkpoint(s), {} live", self.checkpoints.len());
        }

        Ok(removed)
    }
}

fn chrono_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

fn read_checkpoint_file(
    path: &PathBuf,
) -> EngineResult<(CheckpointHeader, Vec<u8>, CheckpointMetadata)> {
    let mut file = fs::File::open(path)?;
    let mut len_buf = [0u8; 8];

    file.read_exact(&mut len_buf)?;
    let header_len = u64::from_le_bytes(len_buf) as usize;
    let mut header_bytes = vec![0u8; header_len];
    file.read_exact(&mut header_bytes)?;
    let header: CheckpointHeader = bincode::deserialize(&header_bytes)?;

    if header.magic != MAGIC || header.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(EngineError::IncompatibleCheckpoint(format!(
            "unrecognized checkpoint header (magic {:?}, format version {})",
            header.magic, header.format_version
        )));
    }
    if header.state_features != STATE_FEATURES as u32 || header.action_space != ACTION_SPACE as u32
    {
        return Err(EngineError::IncompatibleCheckpoint(format!(
            "checkpoint built for state_features={} action_space={}, this build uses {}/{}",
            header.state_features, header.action_space, STATE_FEATURES, ACTION_SPACE
        )));
    }

    file.read_exact(&mut len_buf)?;
    let weights_len = u64::from_le_bytes(len_buf) as usize;
    let mut weights = vec![0u8; weights_len];
    file.read_exact(&mut weights)?;
    let weights = if header.compressed {
        let mut decoder = GzDecoder::new(&weights[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        out
    } else {
        weights
    };

    let mut metadata_bytes = Vec::new();
    file.read_to_end(&mut metadata_bytes)?;
    let metadata: CheckpointMetadata = serde_json::from_slice(&metadata_bytes)?;

    Ok((header, weights, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(performance: f64) -> CheckpointMetadata {
        CheckpointMetadata {
            cycle: 1,
            performance,
            description: "test".into(),
            is_best: false,
            extras: serde_json::Map::new(),
        }
    }

    #[test]
    fn bucket_recommendation_thresholds() {
        assert_eq!(bucket_recommendation(15.0), Recommendation::MajorImprovement);
        assert_eq!(bucket_recommendation(7.0), Recommendation::Improvement);
        assert_eq!(bucket_recommendation(2.0), Recommendation::SlightImprovement);
        assert_eq!(bucket_recommendation(0.5), Recommendation::NoSignificantChange);
        assert_eq!(bucket_recommendation(-0.5), Recommendation::NoSignificantChange);
        assert_eq!(bucket_recommendation(-2.0), Recommendation::SlightRegression);
        assert_eq!(bucket_recommendation(-7.0), Recommendation::Regression);
    }

    #[test]
    fn retention_math_matches_spec_scenario() {
        let _ = env_logger::try_init();
        // spec §8 scenario 5: performances {0.1,0.3,0.2,0.7,0.5,0.4,0.6,0.8},
        // max_versions=5 -> live set {0.4,0.5,0.6,0.7,0.8}, best = 0.8.
        let dir = std::env::temp_dir().join(format!(
            "rl-chess-selfplay-checkpoint-test-{}",
            std::process::id()
        ));
        let device = crate::test_support::test_device();
        let model = crate::test_support::TinyModel::new(&device);
        let agent = NetworkWrapper::new(model, device, crate::network::LossKind::Mse);

        let mut manager: CheckpointManager<
            crate::test_support::TestBackend,
            crate::test_support::TinyModel<crate::test_support::TestBackend>,
            2,
        > = CheckpointManager::new(dir.clone(), 5, false, false);

        for (i, perf) in [0.1, 0.3, 0.2, 0.7, 0.5, 0.4, 0.6, 0.8].into_iter().enumerate() {
            manager.create(&agent, i as u32, meta(perf)).unwrap();
        }
        // `create` already triggers `cleanup` once retention is exceeded,
        // but call it again explicitly so this test exercises `cleanup`
        // directly rather than only its side effect inside `create`.
        manager.cleanup().unwrap();

        let mut kept: Vec<f64> = manager
            .list()
            .into_iter()
            .map(|c| c.metadata.performance)
            .collect();
        kept.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(kept, vec![0.4, 0.5, 0.6, 0.7, 0.8]);
        assert_eq!(manager.best().unwrap().metadata.performance, 0.8);

        let _ = fs::remove_dir_all(&dir);
    }
}
