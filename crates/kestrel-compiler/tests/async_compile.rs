//! Compiling files concurrently.

#![cfg(feature = "async")]

use std::fs;
use std::path::PathBuf;

use kestrel_compiler::{AsyncCompiler, CompilerConfig, DumpOptions, Error, Output, Target};

fn write(dir: &tempfile::TempDir, name: &str, source: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, source).unwrap();
    path
}

#[tokio::test]
async fn test_results_follow_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write(&dir, "first.js", "function first() { return 1; }"),
        write(&dir, "broken.js", "function ( {"),
        write(&dir, "typed.ts", "function typed(n: number): number { return n * 2; }"),
    ];

    let results = AsyncCompiler::new(CompilerConfig::default()).compile_files(&paths).await;
    assert_eq!(results.len(), 3);

    let first = results[0].as_ref().unwrap();
    assert!(first.module.functions.iter().any(|f| f.name == "first"));
    assert!(matches!(results[1], Err(Error::Syntax { line: 1, .. })));
    let typed = results[2].as_ref().unwrap();
    assert!(typed.module.functions.iter().any(|f| f.name == "typed"));
}

#[tokio::test]
async fn test_annotations_need_the_ts_extension() {
    let dir = tempfile::tempdir().unwrap();
    let source = "let n: number = 1;";
    let plain = write(&dir, "plain.js", source);
    let typed = write(&dir, "typed.ts", source);

    let compiler = AsyncCompiler::new(CompilerConfig::default());
    assert!(compiler.compile_file(&plain).await.is_err());
    assert!(compiler.compile_file(&typed).await.is_ok());
}

#[tokio::test]
async fn test_dumps_and_native_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "unit.js", "function f(a) { return a + 1; }");
    let config = CompilerConfig {
        target: Target::Native,
        ..CompilerConfig::default()
    };
    let dumps = DumpOptions {
        ir: true,
        ..DumpOptions::default()
    };

    let output = AsyncCompiler::new(config).with_dumps(dumps).compile_file(&path).await.unwrap();
    assert!(output.dump.contains("function f(a)"));
    assert!(matches!(output.output, Output::Native(ref text) if text.contains("_1_f")));
}
