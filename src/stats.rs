//! Summary statistics of an inferred genealogy.

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::InferError;
use crate::pipeline::{InferenceParams, PipelineOutput};
use crate::trees::TreeSequence;

/// Span-weighted moments of the number of children of internal nodes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChildStats {
    pub mean: f64,
    /// The uncorrected second central moment.
    pub variance: f64,
}

/// Children per internal node, weighted by the span of each local tree.
///
/// Every node with at least one child in a tree counts once for that tree,
/// weighted by the tree's span. Both statistics are NaN when no tree has an
/// internal node.
pub fn node_children_stats(ts: &TreeSequence) -> ChildStats {
    let mut first = 0.0;
    let mut second = 0.0;
    let mut total = 0.0;
    let mut trees = ts.trees();
    while let Some(tree) = trees.next_tree() {
        let span = tree.span();
        for &u in tree.internal_nodes() {
            let children = tree.num_children(u) as f64;
            first += children * span;
            second += children * children * span;
            total += span;
        }
    }
    if total == 0.0 {
        log::warn!("no internal nodes, child count statistics are undefined");
        return ChildStats {
            mean: f64::NAN,
            variance: f64::NAN,
        };
    }
    let mean = first / total;
    ChildStats {
        mean,
        variance: second / total - mean * mean,
    }
}

/// One line of the results file. Fields are written in declaration order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultRecord {
    pub ma_mut: f64,
    pub ms_mut: f64,
    pub precision: u32,
    pub edges: usize,
    pub mutations: usize,
    pub num_trees: usize,
    /// Unset when there is no ground truth to compare against.
    pub kc_distance: Option<f64>,
    pub mean_children: f64,
    pub variance_children: f64,
    pub elapsed_cpu_time: f64,
    pub output_size_bytes: u64,
    pub output_path: String,
}

/// KC distance between `simplified` and the genealogy stored at `path`, or
/// `None` when there is no such file.
pub fn ground_truth_distance(
    simplified: &TreeSequence,
    path: &Path,
) -> Result<Option<f64>, InferError> {
    if !path.exists() {
        log::info!("no ground truth at {}", path.display());
        return Ok(None);
    }
    let truth = TreeSequence::load(path)?;
    Ok(Some(simplified.kc_distance(&truth)?))
}

/// Build the results of a finished run.
pub fn summarize(
    output: &PipelineOutput,
    params: &InferenceParams,
) -> Result<ResultRecord, InferError> {
    let inferred = &output.inferred;
    let simplified = inferred.simplify();
    log::debug!(
        "simplified {} nodes to {}",
        inferred.num_nodes(),
        simplified.num_nodes()
    );
    let kc_distance = ground_truth_distance(&simplified, &output.paths.ground_truth())?;
    let children = node_children_stats(&simplified);
    let ts_path = output.paths.trees();
    let output_size_bytes = fs::metadata(&ts_path)?.len();

    Ok(ResultRecord {
        ma_mut: params.ma_mut_rate,
        ms_mut: params.ms_mut_rate,
        precision: params.precision,
        edges: inferred.num_edges(),
        mutations: inferred.num_mutations(),
        num_trees: inferred.num_trees(),
        kc_distance,
        mean_children: children.mean,
        variance_children: children.variance,
        elapsed_cpu_time: output.cpu_time,
        output_size_bytes,
        output_path: ts_path.display().to_string(),
    })
}

/// Write `record` as a single tab-separated line, without a header.
pub fn write_results(path: impl AsRef<Path>, record: &ResultRecord) -> Result<(), InferError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path.as_ref())?;
    writer.serialize(record)?;
    writer.flush()?;
    log::info!("results written to {}", path.as_ref().display());
    Ok(())
}
