// crates/wikistages/tests/parse_test.rs

use wikicore::{
    DirEntry, ErrorKind, EventBus, RawContent, RepoReference, RunId, RunState, SourceFile, Stage,
    StageContext, StageId, SymbolKind,
};
use wikistages::{parser_for, ParseStage};

fn test_context() -> StageContext {
    let bus = EventBus::new(16);
    StageContext::new(bus.create_emitter(RunId::new_v4(), StageId::ParseCode))
}

fn source(path: &str, language: Option<&str>, content: &str) -> SourceFile {
    SourceFile {
        path: path.to_string(),
        content: content.to_string(),
        language: language.map(|s| s.to_string()),
    }
}

fn raw_content(files: Vec<SourceFile>) -> RawContent {
    let total_files = files.len();
    RawContent {
        url: "/tmp/widget".to_string(),
        name: "widget".to_string(),
        branch: None,
        files,
        languages: Vec::new(),
        structure: DirEntry::directory("widget"),
        total_files,
        total_lines: 0,
    }
}

fn state_with_files(files: Vec<SourceFile>) -> RunState {
    RunState::new(RepoReference::parse("/tmp/widget")).with_raw_content(raw_content(files))
}

#[test]
fn test_parser_lookup_by_language() {
    assert!(parser_for("Rust").is_some());
    assert!(parser_for("Python").is_some());
    assert!(parser_for("JavaScript").is_some());
    assert!(parser_for("TypeScript").is_some());
    assert!(parser_for("TypeScript React").is_some());
    assert!(parser_for("Go").is_some());
    assert!(parser_for("COBOL").is_none());
}

#[test]
fn test_rust_parser_extracts_symbols_and_imports() {
    let file = source(
        "src/engine.rs",
        Some("Rust"),
        "use std::collections::HashMap;\n\
         use crate::config::Settings;\n\
         \n\
         pub const MAX_RETRIES: u32 = 3;\n\
         \n\
         pub struct Engine {\n\
             settings: Settings,\n\
         }\n\
         \n\
         pub(crate) enum Mode {\n\
             Fast,\n\
         }\n\
         \n\
         pub trait Runner {\n\
             fn run(&self);\n\
         }\n\
         \n\
         pub async fn start(engine: Engine) {}\n\
         \n\
         fn helper() {}\n",
    );

    let parsed = parser_for("Rust").unwrap().parse(&file).unwrap();

    let names: Vec<(&str, SymbolKind)> = parsed
        .symbols
        .iter()
        .map(|s| (s.name.as_str(), s.kind))
        .collect();
    assert!(names.contains(&("Engine", SymbolKind::Type)));
    assert!(names.contains(&("Mode", SymbolKind::Type)));
    assert!(names.contains(&("Runner", SymbolKind::Type)));
    assert!(names.contains(&("start", SymbolKind::Function)));
    assert!(names.contains(&("helper", SymbolKind::Function)));
    assert!(names.contains(&("run", SymbolKind::Function)));
    assert!(names.contains(&("MAX_RETRIES", SymbolKind::Constant)));

    assert_eq!(
        parsed.imports,
        vec!["std::collections::HashMap", "crate::config::Settings"]
    );
    assert_eq!(parsed.language, "Rust");
}

#[test]
fn test_rust_parser_records_first_occurrence_line() {
    let file = source(
        "src/lib.rs",
        Some("Rust"),
        "pub struct Engine;\n\npub fn start() {}\n",
    );

    let parsed = parser_for("Rust").unwrap().parse(&file).unwrap();

    let engine = parsed.symbols.iter().find(|s| s.name == "Engine").unwrap();
    assert_eq!(engine.line, 1);
    let start = parsed.symbols.iter().find(|s| s.name == "start").unwrap();
    assert_eq!(start.line, 3);
}

#[test]
fn test_rust_parser_dedupes_repeated_symbols() {
    let file = source(
        "src/dup.rs",
        Some("Rust"),
        "impl Alpha {\n    fn new() -> Self { Self }\n}\n\
         impl Beta {\n    fn new() -> Self { Self }\n}\n",
    );

    let parsed = parser_for("Rust").unwrap().parse(&file).unwrap();

    let news: Vec<_> = parsed.symbols.iter().filter(|s| s.name == "new").collect();
    assert_eq!(news.len(), 1, "duplicate fn names collapse to one symbol");
    assert_eq!(news[0].line, 2);
}

#[test]
fn test_python_parser_skips_indented_definitions() {
    let file = source(
        "app/models.py",
        Some("Python"),
        "import os\n\
         from collections.abc import Mapping\n\
         \n\
         MAX_SIZE = 10\n\
         \n\
         class Model:\n    def save(self):\n        pass\n\
         \n\
         async def fetch_all():\n    pass\n",
    );

    let parsed = parser_for("Python").unwrap().parse(&file).unwrap();

    let names: Vec<&str> = parsed.symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["MAX_SIZE", "Model", "fetch_all"]);
    assert!(
        !names.contains(&"save"),
        "methods are not top-level symbols"
    );
    assert_eq!(parsed.imports, vec!["os", "collections.abc"]);
}

#[test]
fn test_js_parser_handles_typescript_constructs() {
    let file = source(
        "src/widget.tsx",
        Some("TypeScript React"),
        "import React from 'react';\n\
         import './styles.css';\n\
         const fs = require('fs');\n\
         \n\
         export const DEFAULT_TIMEOUT = 5;\n\
         \n\
         export interface Props {\n\
             label: string;\n\
         }\n\
         \n\
         export type Handler = () => void;\n\
         \n\
         export default function Widget(props: Props) {\n\
             return null;\n\
         }\n\
         \n\
         class Internal {}\n",
    );

    let parsed = parser_for("TypeScript React").unwrap().parse(&file).unwrap();

    let names: Vec<(&str, SymbolKind)> = parsed
        .symbols
        .iter()
        .map(|s| (s.name.as_str(), s.kind))
        .collect();
    assert!(names.contains(&("Props", SymbolKind::Type)));
    assert!(names.contains(&("Handler", SymbolKind::Type)));
    assert!(names.contains(&("Widget", SymbolKind::Function)));
    assert!(names.contains(&("Internal", SymbolKind::Type)));
    assert!(names.contains(&("DEFAULT_TIMEOUT", SymbolKind::Constant)));

    assert_eq!(parsed.imports, vec!["react", "./styles.css", "fs"]);
    assert_eq!(parsed.language, "TypeScript React");
}

#[test]
fn test_go_parser_reads_grouped_imports() {
    let file = source(
        "server/main.go",
        Some("Go"),
        "package main\n\
         \n\
         import \"os\"\n\
         \n\
         import (\n\
             \"fmt\"\n\
             xhttp \"net/http\"\n\
         )\n\
         \n\
         const MaxConns = 16\n\
         \n\
         type Server struct{}\n\
         \n\
         func (s *Server) Start() error { return nil }\n\
         \n\
         func main() {}\n",
    );

    let parsed = parser_for("Go").unwrap().parse(&file).unwrap();

    let names: Vec<&str> = parsed.symbols.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"Server"));
    assert!(names.contains(&"Start"));
    assert!(names.contains(&"main"));
    assert!(names.contains(&"MaxConns"));

    assert_eq!(parsed.imports, vec!["os", "fmt", "net/http"]);
}

#[tokio::test]
async fn test_parse_stage_builds_structure() {
    let state = state_with_files(vec![
        source("src/app.rs", Some("Rust"), "pub fn run() {}\n"),
        source("src/core.rs", Some("Rust"), "pub struct Engine;\n"),
        source("README.md", None, "# Widget\n"),
        source("data.yaml", Some("YAML"), "key: value\n"),
    ]);

    let result = ParseStage::new().execute(&test_context(), state).await;

    assert!(!result.has_error(), "got: {:?}", result.error());
    let parsed = result.parsed().expect("parsed structure present");
    assert_eq!(parsed.files.len(), 2, "only parsable languages survive");
    assert_eq!(parsed.files[0].path, "src/app.rs");
    assert_eq!(parsed.files[1].path, "src/core.rs");
}

#[tokio::test]
async fn test_parse_stage_errors_when_nothing_is_parsable() {
    let state = state_with_files(vec![source("README.md", None, "# Widget\n")]);

    let result = ParseStage::new().execute(&test_context(), state).await;

    let marker = result.error().expect("marker set");
    assert_eq!(marker.kind, ErrorKind::ParseError);
    assert_eq!(marker.stage, StageId::ParseCode);
    assert!(marker.message.contains("no parsable"), "got: {}", marker.message);
    assert!(result.parsed().is_none());
}

#[tokio::test]
async fn test_parse_stage_requires_raw_content() {
    let state = RunState::new(RepoReference::parse("/tmp/widget"));

    let result = ParseStage::new().execute(&test_context(), state).await;

    let marker = result.error().expect("marker set");
    assert_eq!(marker.kind, ErrorKind::ParseError);
    assert!(
        marker.message.contains("raw_content"),
        "got: {}",
        marker.message
    );
}

#[tokio::test]
async fn test_parse_stage_passes_through_on_error() {
    let state = state_with_files(vec![source("src/app.rs", Some("Rust"), "fn run() {}\n")])
        .set_error(ErrorKind::FetchError, StageId::FetchRepository, "clone failed");

    let result = ParseStage::new().execute(&test_context(), state).await;

    assert!(result.parsed().is_none(), "stage must not run on an error state");
    assert_eq!(result.error().unwrap().message, "clone failed");
}
