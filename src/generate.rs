//! File generation on top of the traversal driver
//!
//! [`generate_file`] writes one output file:
//!
//! 1. refuse an existing target when overwriting is disabled;
//! 2. open a sibling temporary file behind a [`BlockWriter`] and write the
//!    renderer's prologue;
//! 3. partition the descriptors, one root task per chunk; each task renders
//!    its descriptors and writes one block per descriptor;
//! 4. at quiescence the finalize step writes the epilogue (only if nothing
//!    failed) and closes the writer;
//! 5. rename the temporary file into place, or remove it on any failure.
//!
//! [`generate_all`] runs one such traversal per renderer concurrently; each
//! has its own group, pool and writer.

use crate::descriptor::ClassDescriptor;
use crate::error::{
    AggregateError, GenError, PoolError, Result, TaskError, TaskFailure, TaskResult,
};
use crate::parallel::pool::default_lanes;
use crate::parallel::serializer::DEFAULT_CHANNEL_SIZE;
use crate::parallel::{
    BlockSink, BlockWriter, CancellationToken, PoolConfig, TaskScope, Traversal,
    TraversalReport, WriterHandle,
};
use crate::render::Render;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Knobs for one generation run
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Pool lanes, also the number of chunks
    pub lanes: usize,

    /// Fail with `FileExists` instead of replacing an existing file
    pub no_overwrite: bool,

    /// Writer channel capacity in blocks
    pub channel_size: usize,

    /// Shared cancellation flag
    pub cancel: CancellationToken,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            no_overwrite: false,
            channel_size: DEFAULT_CHANNEL_SIZE,
            cancel: CancellationToken::new(),
        }
    }
}

impl GenerateOptions {
    pub fn with_lanes(lanes: usize) -> Self {
        Self {
            lanes,
            ..Self::default()
        }
    }
}

/// What one generated file cost
#[derive(Debug, Clone)]
pub struct GenerateReport {
    pub path: PathBuf,
    pub classes: usize,
    pub blocks: u64,
    pub bytes: u64,
    pub tasks: u64,
    pub lanes: usize,
    pub peak_active: usize,
    pub duration: Duration,
}

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        warn!(path = %partial.display(), error = %e, "Failed to remove partial output");
    }
}

/// Move the finished temporary file to its final name
///
/// With `no_overwrite` the file is hard-linked into place, which fails if
/// the target appeared after the up-front check.
fn publish(partial: &Path, target: &Path, no_overwrite: bool) -> Result<()> {
    if !no_overwrite {
        fs::rename(partial, target)?;
        return Ok(());
    }

    match fs::hard_link(partial, target) {
        Ok(()) => {
            discard(partial);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(GenError::FileExists {
            path: target.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Generate one file in `dir` from `descriptors`
///
/// Returns once the writer has closed. On failure no file is left at the
/// target path; the error lists every failed task.
pub fn generate_file(
    dir: &Path,
    descriptors: &[ClassDescriptor],
    render: Arc<dyn Render>,
    options: &GenerateOptions,
) -> Result<GenerateReport> {
    let start = Instant::now();
    let target = dir.join(render.file_name());

    if options.no_overwrite && target.exists() {
        return Err(GenError::FileExists { path: target });
    }

    let partial = partial_path(&target);
    let file = File::create(&partial)?;
    let writer = match BlockWriter::new(BufWriter::new(file), options.channel_size) {
        Ok(w) => w,
        Err(e) => {
            discard(&partial);
            return Err(e.into());
        }
    };
    let handle = writer.handle();

    let outcome = drive(descriptors, &render, &handle, options);

    // the finalize step closed the writer unless the traversal never started
    let finished = writer.finish();

    let report = match (outcome, finished) {
        (Ok(report), Ok(_)) => report,
        (Err(e), _) => {
            discard(&partial);
            return Err(e);
        }
        (Ok(_), Err(e)) => {
            discard(&partial);
            return Err(e.into());
        }
    };

    if let Err(e) = publish(&partial, &target, options.no_overwrite) {
        discard(&partial);
        return Err(e);
    }

    let report = GenerateReport {
        path: target,
        classes: descriptors.len(),
        blocks: handle.stats().blocks_written(),
        bytes: handle.stats().bytes_written(),
        tasks: report.tasks,
        lanes: report.lanes,
        peak_active: report.peak_active,
        duration: start.elapsed(),
    };

    info!(
        path = %report.path.display(),
        blocks = report.blocks,
        bytes = report.bytes,
        "Generated file"
    );
    Ok(report)
}

/// Run the traversal; the writer is closed by the finalize step
fn drive(
    descriptors: &[ClassDescriptor],
    render: &Arc<dyn Render>,
    handle: &WriterHandle,
    options: &GenerateOptions,
) -> Result<TraversalReport> {
    handle.write_block(render.prologue(descriptors))?;

    let config = PoolConfig::with_lanes(options.lanes).named("gen");
    let traversal = Traversal::with_cancel(&config, options.cancel.clone())?;

    {
        let handle = handle.clone();
        let group = traversal.group().clone();
        let cancel = options.cancel.clone();
        let epilogue = render.epilogue();

        traversal.on_quiescent(move || {
            if group.failure_count() == 0 && !cancel.is_cancelled() && !epilogue.is_empty() {
                if let Err(e) = handle.write_block(epilogue) {
                    group.record_failure(TaskFailure::new("epilogue", TaskError::Write(e)));
                }
            }
            if let Err(e) = handle.close() {
                warn!(error = %e, "Failed to close writer");
            }
        })?;
    }

    let lanes = traversal.lanes();
    let sink = handle.clone();
    let render = Arc::clone(render);

    let job = move |index: usize, chunk: Vec<ClassDescriptor>, scope: &TaskScope| -> TaskResult {
        debug!(chunk = index, classes = chunk.len(), "Rendering chunk");
        for class in &chunk {
            if scope.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            match render.render(class) {
                Ok(block) => sink.write_block(block)?,
                Err(e) => scope.record_failure(class.name.clone(), e),
            }
        }
        Ok(())
    };
    let submitted = traversal.run_chunked(descriptors.to_vec(), lanes, job);

    let interrupted = matches!(submitted, Err(PoolError::Cancelled));
    if let Err(e) = &submitted {
        if !interrupted {
            warn!(error = %e, "Chunk submission stopped");
        }
    }

    let report = traversal.wait()?;

    if interrupted || options.cancel.is_cancelled() {
        return Err(GenError::Interrupted);
    }
    if let Err(e) = submitted {
        return Err(e.into());
    }
    if !report.failures.is_empty() {
        return Err(AggregateError::new(report.failures).into());
    }
    Ok(report)
}

/// Generate every renderer's file concurrently
///
/// Results come back in the order of `renders`. A renderer whose file name
/// was already claimed by an earlier one is not run and gets
/// `DuplicateTarget`.
pub fn generate_all(
    dir: &Path,
    descriptors: &[ClassDescriptor],
    renders: &[Arc<dyn Render>],
    options: &GenerateOptions,
) -> Vec<Result<GenerateReport>> {
    let mut claimed = HashSet::new();
    let duplicate: Vec<bool> = renders
        .iter()
        .map(|render| !claimed.insert(render.file_name()))
        .collect();

    thread::scope(|s| {
        let handles: Vec<_> = renders
            .iter()
            .zip(&duplicate)
            .map(|(render, &duplicate)| {
                if duplicate {
                    return None;
                }
                let render = Arc::clone(render);
                let name = format!("gen-{}", render.file_name());
                Some(
                    thread::Builder::new()
                        .name(name)
                        .spawn_scoped(s, move || generate_file(dir, descriptors, render, options)),
                )
            })
            .collect();

        handles
            .into_iter()
            .zip(renders)
            .map(|(spawned, render)| match spawned {
                None => {
                    let path = dir.join(render.file_name());
                    warn!(path = %path.display(), "Output file claimed by more than one renderer");
                    Err(GenError::DuplicateTarget { path })
                }
                Some(Ok(h)) => h
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("generator thread panicked").into())),
                Some(Err(e)) => Err(GenError::Io(e)),
            })
            .collect()
    })
}

/// Render on the calling thread, in input order
///
/// The single-lane reference output for a renderer.
pub fn render_sequential(
    descriptors: &[ClassDescriptor],
    render: &dyn Render,
) -> std::result::Result<String, AggregateError> {
    let mut out = render.prologue(descriptors).into_string();
    let mut failures = Vec::new();

    for class in descriptors {
        match render.render(class) {
            Ok(block) => out.push_str(block.as_str()),
            Err(e) => failures.push(TaskFailure::new(class.name.clone(), e)),
        }
    }

    if !failures.is_empty() {
        return Err(AggregateError::new(failures));
    }
    out.push_str(render.epilogue().as_str());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::OutputBlock;
    use crate::render::{
        ClassListRenderer, NodeRenderer, ParallelVisitorRenderer, VisitorTraitRenderer,
    };
    use tempfile::TempDir;

    fn sample(n: usize) -> Vec<ClassDescriptor> {
        (0..n)
            .map(|i| {
                let mut class = ClassDescriptor::new(format!("Class{}", i));
                for f in 0..(i % 4) {
                    class = class.field(format!("Type{}", f), format!("f{}", f));
                }
                class
            })
            .collect()
    }

    /// Fails on every class whose name ends in the given digit
    struct Picky(char);

    impl Render for Picky {
        fn file_name(&self) -> String {
            "picky.txt".into()
        }

        fn prologue(&self, _: &[ClassDescriptor]) -> OutputBlock {
            "begin\n".into()
        }

        fn render(&self, class: &ClassDescriptor) -> std::result::Result<OutputBlock, TaskError> {
            if class.name.ends_with(self.0) {
                return Err(TaskError::Render {
                    descriptor: class.name.clone(),
                    reason: "picky".into(),
                });
            }
            Ok(format!("{}\n", class.name).into())
        }

        fn epilogue(&self) -> OutputBlock {
            "end\n".into()
        }
    }

    #[test]
    fn test_same_blocks_as_sequential() {
        let dir = TempDir::new().unwrap();
        let classes = sample(37);
        let render: Arc<dyn Render> = Arc::new(ParallelVisitorRenderer::new("ParallelVisitor"));

        let report =
            generate_file(dir.path(), &classes, Arc::clone(&render), &GenerateOptions::with_lanes(4))
                .unwrap();
        let text = fs::read_to_string(&report.path).unwrap();
        let expected = render_sequential(&classes, render.as_ref()).unwrap();

        // prologue plus one block per class; the epilogue is empty
        assert_eq!(report.blocks, 37 + 1);
        assert_eq!(report.tasks, 4);
        assert_eq!(text.len(), expected.len());
        assert!(text.starts_with(render.prologue(&classes).as_str()));
        assert!(text.ends_with(render.epilogue().as_str()));
        for class in &classes {
            let block = render.render(class).unwrap();
            assert!(text.contains(block.as_str()), "missing {}", class.name);
        }
    }

    #[test]
    fn test_single_lane_matches_sequential_exactly() {
        let dir = TempDir::new().unwrap();
        let classes = sample(23);

        let report = generate_file(
            dir.path(),
            &classes,
            Arc::new(NodeRenderer),
            &GenerateOptions::with_lanes(1),
        )
        .unwrap();

        let text = fs::read_to_string(&report.path).unwrap();
        assert_eq!(text, render_sequential(&classes, &NodeRenderer).unwrap());
    }

    #[test]
    fn test_failure_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let classes = sample(20);

        let err = generate_file(
            dir.path(),
            &classes,
            Arc::new(Picky('7')),
            &GenerateOptions::with_lanes(3),
        )
        .unwrap_err();

        match err {
            GenError::Tasks(agg) => {
                let mut names: Vec<_> = agg.failures().iter().map(|f| f.task.clone()).collect();
                names.sort();
                assert_eq!(names, vec!["Class17", "Class7"]);
            }
            other => panic!("unexpected error: {}", other),
        }

        assert!(!dir.path().join("picky.txt").exists());
        assert!(!dir.path().join(".picky.txt.partial").exists());
    }

    #[test]
    fn test_no_overwrite_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("classes.txt");
        fs::write(&target, "keep me").unwrap();

        let options = GenerateOptions {
            no_overwrite: true,
            ..GenerateOptions::with_lanes(2)
        };
        let err = generate_file(dir.path(), &sample(5), Arc::new(ClassListRenderer), &options)
            .unwrap_err();

        assert!(matches!(err, GenError::FileExists { path } if path == target));
        assert_eq!(fs::read_to_string(&target).unwrap(), "keep me");
    }

    #[test]
    fn test_overwrite_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("classes.txt");
        fs::write(&target, "old").unwrap();

        generate_file(
            dir.path(),
            &sample(3),
            Arc::new(ClassListRenderer),
            &GenerateOptions::with_lanes(2),
        )
        .unwrap();
        assert!(fs::read_to_string(&target).unwrap().starts_with("class Class"));
    }

    #[test]
    fn test_cancelled_before_start_is_interrupted() {
        let dir = TempDir::new().unwrap();
        let options = GenerateOptions::with_lanes(2);
        options.cancel.cancel();

        let err = generate_file(dir.path(), &sample(8), Arc::new(NodeRenderer), &options)
            .unwrap_err();
        assert!(matches!(err, GenError::Interrupted));
        assert!(!dir.path().join("nodes.rs").exists());
    }

    #[test]
    fn test_empty_descriptor_list() {
        let dir = TempDir::new().unwrap();
        let report = generate_file(
            dir.path(),
            &[],
            Arc::new(Picky('x')),
            &GenerateOptions::with_lanes(4),
        )
        .unwrap();

        // one empty chunk still runs
        assert_eq!(report.tasks, 1);
        assert_eq!(fs::read_to_string(&report.path).unwrap(), "begin\nend\n");
    }

    #[test]
    fn test_generate_all_runs_every_renderer() {
        let dir = TempDir::new().unwrap();
        let renders: Vec<Arc<dyn Render>> = vec![
            Arc::new(NodeRenderer),
            Arc::new(ClassListRenderer),
            Arc::new(Picky('3')),
        ];

        let results = generate_all(
            dir.path(),
            &sample(12),
            &renders,
            &GenerateOptions::with_lanes(2),
        );

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(GenError::Tasks(_))));
        assert!(dir.path().join("nodes.rs").exists());
        assert!(dir.path().join("classes.txt").exists());
    }

    #[test]
    fn test_generate_all_refuses_shared_target() {
        let dir = TempDir::new().unwrap();
        let classes = sample(40);
        let renders: Vec<Arc<dyn Render>> = vec![
            Arc::new(VisitorTraitRenderer),
            Arc::new(ParallelVisitorRenderer::new("Visitor")),
        ];

        let results = generate_all(
            dir.path(),
            &classes,
            &renders,
            &GenerateOptions::with_lanes(4),
        );

        assert!(results[0].is_ok());
        assert!(matches!(
            &results[1],
            Err(GenError::DuplicateTarget { path }) if path.ends_with("visitor.rs")
        ));
        // the surviving file belongs to one renderer only
        let text = fs::read_to_string(dir.path().join("visitor.rs")).unwrap();
        assert_eq!(text.len(), render_sequential(&classes, &VisitorTraitRenderer).unwrap().len());
        assert!(!text.contains("ParallelAccept"));
    }

    /// Creates the target file while rendering, like a concurrent writer
    struct Intruder(PathBuf);

    impl Render for Intruder {
        fn file_name(&self) -> String {
            "contested.txt".into()
        }

        fn prologue(&self, _: &[ClassDescriptor]) -> OutputBlock {
            OutputBlock::default()
        }

        fn render(&self, class: &ClassDescriptor) -> std::result::Result<OutputBlock, TaskError> {
            if !self.0.exists() {
                let _ = fs::write(&self.0, "theirs");
            }
            Ok(format!("{}\n", class.name).into())
        }
    }

    #[test]
    fn test_no_overwrite_holds_when_target_appears_mid_run() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("contested.txt");

        let options = GenerateOptions {
            no_overwrite: true,
            ..GenerateOptions::with_lanes(2)
        };
        let err = generate_file(
            dir.path(),
            &sample(6),
            Arc::new(Intruder(target.clone())),
            &options,
        )
        .unwrap_err();

        assert!(matches!(err, GenError::FileExists { path } if path == target));
        assert_eq!(fs::read_to_string(&target).unwrap(), "theirs");
        assert!(!dir.path().join(".contested.txt.partial").exists());
    }

    #[test]
    fn test_no_overwrite_publishes_new_file() {
        let dir = TempDir::new().unwrap();
        let options = GenerateOptions {
            no_overwrite: true,
            ..GenerateOptions::with_lanes(2)
        };

        let report =
            generate_file(dir.path(), &sample(4), Arc::new(ClassListRenderer), &options).unwrap();
        assert!(report.path.exists());
        assert!(!dir.path().join(".classes.txt.partial").exists());
    }

    #[test]
    fn test_render_sequential_collects_failures() {
        let err = render_sequential(&sample(14), &Picky('1')).unwrap_err();
        assert_eq!(err.len(), 2);
    }
}
