//! Compiling several units at once.
//!
//! The pipeline for one unit is synchronous. These wrappers only spread
//! independent units over threads: [`AsyncCompiler`] reads files with
//! tokio and compiles each on the blocking pool, [`ParallelCompiler`]
//! runs units on a rayon pool and can bundle them into a single bytecode
//! container sharing one string table.

#[cfg(feature = "async")]
use std::path::{Path, PathBuf};
#[cfg(feature = "async")]
use tokio::fs;

use crate::config::CompilerConfig;
use crate::error::{Error, Result};
use crate::{CompileOutput, Compiler, DumpOptions};

/// Compiles source files concurrently on a tokio runtime.
///
/// Units compile on the runtime's blocking threads, so the runtime should
/// give them [`crate::COMPILER_STACK_SIZE`] with
/// `Builder::thread_stack_size`.
#[cfg(feature = "async")]
#[derive(Debug, Clone)]
pub struct AsyncCompiler {
    config: CompilerConfig,
    dumps: DumpOptions,
}

#[cfg(feature = "async")]
impl AsyncCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            dumps: DumpOptions::default(),
        }
    }

    /// Requests dumps for every unit.
    pub fn with_dumps(mut self, dumps: DumpOptions) -> Self {
        self.dumps = dumps;
        self
    }

    /// Compiles source text on the blocking pool.
    pub async fn compile_source(&self, source: String) -> Result<CompileOutput> {
        let config = self.config.clone();
        let dumps = self.dumps.clone();
        tokio::task::spawn_blocking(move || Compiler::new(config).compile(&source, &dumps))
            .await
            .map_err(|e| Error::internal("compile task", e.to_string()))?
    }

    /// Reads and compiles one file. A `.ts` extension turns on the typed
    /// grammar for that file.
    pub async fn compile_file(&self, path: impl AsRef<Path>) -> Result<CompileOutput> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .await
            .map_err(|e| Error::Io(format!("failed to read {}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), bytes = source.len(), "read source");

        let mut unit = self.clone();
        if path.extension().is_some_and(|ext| ext == "ts") {
            unit.config.typescript = true;
        }
        unit.compile_source(source).await
    }

    /// Compiles every file concurrently. Results are in input order.
    pub async fn compile_files(&self, paths: &[PathBuf]) -> Vec<Result<CompileOutput>> {
        let futures: Vec<_> = paths.iter().map(|p| self.compile_file(p)).collect();
        futures::future::join_all(futures).await
    }
}

/// Compiles in-memory units on a rayon pool.
#[cfg(feature = "parallel")]
pub struct ParallelCompiler {
    config: CompilerConfig,
    pool: rayon::ThreadPool,
}

#[cfg(feature = "parallel")]
impl ParallelCompiler {
    /// Uses one thread per core.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        Self::with_threads(config, 0)
    }

    /// `threads == 0` picks the rayon default.
    pub fn with_threads(config: CompilerConfig, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .stack_size(crate::COMPILER_STACK_SIZE)
            .build()
            .map_err(|e| Error::internal("thread pool", e.to_string()))?;
        Ok(Self { config, pool })
    }

    /// Compiles every unit independently. Results are in input order.
    pub fn compile_all(&self, sources: &[&str]) -> Vec<Result<CompileOutput>> {
        use rayon::prelude::*;

        let dumps = DumpOptions::default();
        self.pool.install(|| {
            sources
                .par_iter()
                .map(|source| Compiler::new(self.config.clone()).compile(source, &dumps))
                .collect()
        })
    }

    /// Compiles every unit and packs all of them into one bytecode
    /// container with a single string table. Fails on the first unit
    /// that fails.
    pub fn bundle(&self, sources: &[&str]) -> Result<crate::backend::BytecodeModule> {
        use crate::backend::{BytecodeModule, hbc};
        use crate::intern::SharedStringTable;
        use rayon::prelude::*;

        let compiler = Compiler::new(self.config.clone());
        let modules: Vec<crate::ir::Module> = self.pool.install(|| {
            sources
                .par_iter()
                .map(|source| {
                    let mut module = compiler.lower(source)?;
                    compiler.optimize(&mut module, None)?;
                    compiler.allocate(&mut module, None)?;
                    Ok(module)
                })
                .collect::<Result<_>>()
        })?;

        let mut bases = Vec::with_capacity(modules.len());
        let mut next = 0u32;
        for module in &modules {
            bases.push(next);
            next += module.function_ids().len() as u32;
        }

        // Emission interns strings, so it runs in unit order to keep ids stable.
        let strings = SharedStringTable::new();
        let units: Vec<Vec<hbc::BytecodeFunction>> = modules
            .iter()
            .zip(&bases)
            .map(|(module, &base)| {
                let mut interner = &strings;
                hbc::emit_functions(module, &mut interner, base)
            })
            .collect::<Result<_>>()?;
        tracing::debug!(units = units.len(), functions = next, strings = strings.len(), "bundled units");
        Ok(BytecodeModule::bundle(strings.snapshot(), units))
    }
}

#[cfg(all(test, feature = "async"))]
mod tests {
    use super::*;
    use crate::Output;

    #[tokio::test]
    async fn test_compile_source() {
        let compiler = AsyncCompiler::new(CompilerConfig::default());
        let output = compiler.compile_source("function f(a) { return a + 1; }".into()).await.unwrap();
        assert!(matches!(output.output, Output::Bytecode(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let compiler = AsyncCompiler::new(CompilerConfig::default());
        let err = compiler.compile_file("/nonexistent/unit.js").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
