use anyhow::Result;
use std::process::{Command, Output};
use tempfile::TempDir;

const BOOK: &str = "Chapter 1\nSleep is the foundation of recovery. Aim for seven to nine hours in a dark cool room and keep a regular bedtime every single night.\n\x0cChapter 2\nLift with intent every week. Progressive overload is chapter 2. Progressive overload works by adding load or reps so training keeps getting harder over months.\n";

/// Helper to run the CLI binary with given args against an index in `temp_dir`
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_coach-rag"))
        .arg("--db-dir")
        .arg(temp_dir.path().join("index"))
        .args(args)
        .env("EMBED_MODEL", "hash-512")
        .env("CHUNK_WORDS", "30")
        .env("CHUNK_OVERLAP", "5")
        .env("MIN_CHUNK_WORDS", "5")
        .env("RAG_MIN_SCORE", "0.1")
        .env("RAG_DEBUG", "false")
        .env_remove("TABLE")
        .env_remove("DB_DIR")
        .output()?;
    Ok(output)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_book(temp_dir: &TempDir) -> Result<String> {
    let path = temp_dir.path().join("book.txt");
    std::fs::write(&path, BOOK)?;
    Ok(path.to_string_lossy().into_owned())
}

#[test]
fn test_cli_help() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["--help"])?;
    assert!(output.status.success());

    let out = stdout(&output);
    for command in ["ingest", "search", "stats", "peek"] {
        assert!(out.contains(command), "help is missing {command}");
    }
    Ok(())
}

#[test]
fn test_cli_ingest_and_search() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let book = write_book(&temp_dir)?;

    let output = run_cli(&temp_dir, &["ingest", &book])?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Indexed 2 chunks"));

    let output = run_cli(
        &temp_dir,
        &["search", "how does progressive overload work", "--format", "json"],
    )?;
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let top = &json["snippets"][0];
    assert_eq!(top["page"], 2);
    assert_eq!(top["chapter"], "2");
    assert_eq!(top["rank"], 1);
    assert_eq!(top["source"], "book.txt");
    assert_eq!(top["citation"], "chapter 2 page 2");
    Ok(())
}

#[test]
fn test_cli_stats_and_peek() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let book = write_book(&temp_dir)?;

    let output = run_cli(&temp_dir, &["stats"])?;
    assert!(output.status.success());
    assert!(stdout(&output).contains("has not been built yet"));

    run_cli(&temp_dir, &["ingest", &book, "--source", "coach-book"])?;

    let output = run_cli(&temp_dir, &["stats", "--format", "json"])?;
    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["chunk_count"], 2);
    assert_eq!(json["model_id"], "hash-512");
    assert_eq!(json["source"], "coach-book");
    assert_eq!(json["metric"], "cosine");

    let output = run_cli(&temp_dir, &["peek", "--count", "1", "--format", "json"])?;
    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json.as_array().map(Vec::len), Some(1));
    assert_eq!(json[0]["id"], "coach-book:p1:c1");
    Ok(())
}

#[test]
fn test_cli_second_ingest_is_skipped() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let book = write_book(&temp_dir)?;

    run_cli(&temp_dir, &["ingest", &book])?;
    let output = run_cli(&temp_dir, &["ingest", &book])?;
    assert!(output.status.success());
    assert!(stdout(&output).contains("use --force to rebuild"));

    let output = run_cli(&temp_dir, &["ingest", &book, "--force", "--format", "json"])?;
    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["skipped"], false);
    assert_eq!(json["chunk_count"], 2);
    Ok(())
}

#[test]
fn test_cli_search_before_ingest_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["search", "anything"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("has not been built yet"));
    Ok(())
}

#[test]
fn test_cli_rejects_bad_table_name() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["--table", "no spaces allowed", "stats"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("TABLE"));
    Ok(())
}
