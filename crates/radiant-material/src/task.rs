//! Background material compilation.

use crate::compiler::{CompiledMaterial, MaterialCompiler};
use crate::error::CompileError;
use crate::graph::MaterialGraph;
use crossbeam::channel::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use tracing::debug;

pub type CompileResult = Result<CompiledMaterial, CompileError>;

/// Handle to one compile running on its own thread.
///
/// The graph is snapshotted by value when the task starts.
pub struct CompileTask {
    /// Content hash of the snapshot being compiled.
    hash: u64,
    result_rx: Receiver<CompileResult>,
    thread: Option<JoinHandle<()>>,
}

impl CompileTask {
    pub fn spawn(compiler: MaterialCompiler, graph: MaterialGraph) -> Result<Self, CompileError> {
        let hash = graph.compute_hash();
        let (result_tx, result_rx) = channel::bounded::<CompileResult>(1);

        let thread = thread::Builder::new()
            .name("material-compile".into())
            .spawn(move || {
                let result = compiler.compile(&graph);
                // Receiver dropped means the task was abandoned
                let _ = result_tx.send(result);
            })
            .map_err(|e| CompileError::Task(format!("Failed to spawn compile thread: {e}")))?;

        debug!(hash, "Started background material compile");
        Ok(Self {
            hash,
            result_rx,
            thread: Some(thread),
        })
    }

    /// Hash of the graph snapshot this task compiles.
    pub const fn hash(&self) -> u64 {
        self.hash
    }

    /// Non-blocking check for the result.
    pub fn try_result(&mut self) -> Option<CompileResult> {
        let result = match self.result_rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(CompileError::Task(
                "Compile thread exited without a result".to_string(),
            )),
        };
        self.join();
        Some(result)
    }

    /// Block until the compile finishes.
    pub fn wait(mut self) -> CompileResult {
        let result = self.result_rx.recv().unwrap_or_else(|_| {
            Err(CompileError::Task(
                "Compile thread exited without a result".to_string(),
            ))
        });
        self.join();
        result
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for CompileTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileTask")
            .field("hash", &self.hash)
            .field("finished", &self.thread.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ShaderCompiler;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct Echo;

    impl ShaderCompiler for Echo {
        fn compile_fragment(&self, source: &str, _name: &str) -> Result<Vec<u32>, String> {
            Ok(vec![source.len() as u32])
        }
    }

    #[test]
    fn compiles_off_thread() {
        let graph = MaterialGraph::default();
        let hash = graph.compute_hash();
        let mut task = CompileTask::spawn(MaterialCompiler::new(Arc::new(Echo)), graph).unwrap();
        assert_eq!(task.hash(), hash);

        let deadline = Instant::now() + Duration::from_secs(10);
        let result = loop {
            if let Some(result) = task.try_result() {
                break result;
            }
            assert!(Instant::now() < deadline, "compile never finished");
            thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(result.unwrap().hash, hash);
    }

    #[test]
    fn wait_blocks_for_result() {
        let task =
            CompileTask::spawn(MaterialCompiler::new(Arc::new(Echo)), MaterialGraph::default())
                .unwrap();
        assert!(task.wait().is_ok());
    }
}
