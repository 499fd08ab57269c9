// Merge command: concatenate published partition outputs into one SAM file
//
// Used at the end of a reducer-enabled `align` run and on its own to re-run the
// merge from a saved manifest.

use crate::merge::{collect_references, merge_outputs, MergeManifest, MergeStats};
use log::{info, warn};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

/// Merge every output listed in `manifest` into `output`.
///
/// A partial `output` is removed when the merge fails; the partition outputs
/// are only consumed once the merged file is complete.
pub fn merge_manifest(manifest: &MergeManifest, output: &Path) -> io::Result<MergeStats> {
    let references = collect_references(manifest.references.iter().cloned())?;

    let mut writer = BufWriter::new(File::create(output)?);
    match merge_outputs(&references, manifest.expected_partitions, &mut writer) {
        Ok(stats) => {
            info!("Wrote merged alignments to {}", output.display());
            Ok(stats)
        }
        Err(e) => {
            drop(writer);
            if let Err(remove_err) = fs::remove_file(output) {
                warn!(
                    "Failed to remove partial merged output {}: {}",
                    output.display(),
                    remove_err
                );
            }
            Err(e)
        }
    }
}

/// Run merge command from a manifest file
pub fn run_merge(manifest_path: &Path, output: &Path) -> io::Result<MergeStats> {
    let manifest = MergeManifest::load(manifest_path)?;
    info!(
        "Loaded manifest {} with {} of {} partition outputs",
        manifest_path.display(),
        manifest.references.len(),
        manifest.expected_partitions
    );
    merge_manifest(&manifest, output)
}
