use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;

use crate::fail;
use wikicore::{
    ParsedFile, ParsedStructure, RunState, SourceFile, Stage, StageContext, StageError, StageId,
    Symbol, SymbolKind,
};

/// Per-language symbol extractor.
pub trait LanguageParser: Send + Sync {
    fn parse(&self, file: &SourceFile) -> Result<ParsedFile, StageError>;
}

/// Parser lookup by detected language name. `None` means the language is
/// skipped, not failed.
pub fn parser_for(language: &str) -> Option<Box<dyn LanguageParser>> {
    match language {
        "Rust" => Some(Box::new(RustParser::new())),
        "Python" => Some(Box::new(PythonParser::new())),
        "JavaScript" | "TypeScript" | "React" | "TypeScript React" => {
            Some(Box::new(JsParser::new()))
        }
        "Go" => Some(Box::new(GoParser::new())),
        _ => None,
    }
}

/// Builds the parsed structure from the fetched files.
pub struct ParseStage;

impl ParseStage {
    pub fn new() -> Self {
        Self
    }

    fn parse_all(&self, ctx: &StageContext, state: &RunState) -> Result<ParsedStructure, StageError> {
        let raw = state.require_raw_content()?;
        let mut files = Vec::new();
        let mut skipped = 0usize;

        for source in &raw.files {
            let language = match &source.language {
                Some(language) => language,
                None => {
                    skipped += 1;
                    continue;
                }
            };
            let parser = match parser_for(language) {
                Some(parser) => parser,
                None => {
                    skipped += 1;
                    continue;
                }
            };
            match parser.parse(source) {
                Ok(parsed) => files.push(parsed),
                Err(err) => {
                    tracing::warn!("Skipping {}: {}", source.path, err);
                    skipped += 1;
                }
            }
        }

        if files.is_empty() {
            return Err(StageError::Parse(
                "no parsable source files found".to_string(),
            ));
        }
        ctx.events.info(format!(
            "Parsed {} files, skipped {}",
            files.len(),
            skipped
        ));
        Ok(ParsedStructure { files })
    }
}

impl Default for ParseStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for ParseStage {
    fn id(&self) -> StageId {
        StageId::ParseCode
    }

    async fn execute(&self, ctx: &StageContext, state: RunState) -> RunState {
        if state.has_error() {
            return state;
        }
        match self.parse_all(ctx, &state) {
            Ok(parsed) => state.with_parsed(parsed),
            Err(err) => fail(state, StageId::ParseCode, err),
        }
    }
}

/// Shared line scanner: symbol patterns tried per line, first match wins;
/// duplicates dropped preserving first occurrence.
fn extract(
    file: &SourceFile,
    language: &str,
    symbol_patterns: &[(SymbolKind, Regex)],
    import_patterns: &[Regex],
) -> ParsedFile {
    let mut symbols = Vec::new();
    let mut seen_symbols: HashSet<(SymbolKind, String)> = HashSet::new();
    let mut imports = Vec::new();
    let mut seen_imports: HashSet<String> = HashSet::new();

    for (idx, line) in file.content.lines().enumerate() {
        for (kind, pattern) in symbol_patterns {
            if let Some(captures) = pattern.captures(line) {
                if let Some(name) = captures.get(1) {
                    let name = name.as_str().to_string();
                    if seen_symbols.insert((*kind, name.clone())) {
                        symbols.push(Symbol {
                            name,
                            kind: *kind,
                            line: idx + 1,
                        });
                    }
                    break;
                }
            }
        }
        for pattern in import_patterns {
            if let Some(captures) = pattern.captures(line) {
                let name = captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()
                    .map(|m| m.as_str().to_string());
                if let Some(name) = name {
                    if seen_imports.insert(name.clone()) {
                        imports.push(name);
                    }
                    break;
                }
            }
        }
    }

    ParsedFile {
        path: file.path.clone(),
        language: language.to_string(),
        symbols,
        imports,
    }
}

pub struct RustParser {
    symbols: Vec<(SymbolKind, Regex)>,
    imports: Vec<Regex>,
}

impl RustParser {
    pub fn new() -> Self {
        Self {
            symbols: vec![
                (
                    SymbolKind::Function,
                    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+(\w+)").unwrap(),
                ),
                (
                    SymbolKind::Type,
                    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+(\w+)")
                        .unwrap(),
                ),
                (
                    SymbolKind::Constant,
                    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+([A-Z][A-Z0-9_]*)")
                        .unwrap(),
                ),
            ],
            imports: vec![Regex::new(r"^\s*use\s+([\w:]+)").unwrap()],
        }
    }
}

impl Default for RustParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for RustParser {
    fn parse(&self, file: &SourceFile) -> Result<ParsedFile, StageError> {
        Ok(extract(file, "Rust", &self.symbols, &self.imports))
    }
}

pub struct PythonParser {
    symbols: Vec<(SymbolKind, Regex)>,
    imports: Vec<Regex>,
}

impl PythonParser {
    pub fn new() -> Self {
        Self {
            symbols: vec![
                // Unindented patterns keep methods and nested defs out.
                (
                    SymbolKind::Type,
                    Regex::new(r"^class\s+(\w+)").unwrap(),
                ),
                (
                    SymbolKind::Function,
                    Regex::new(r"^(?:async\s+)?def\s+(\w+)").unwrap(),
                ),
                (
                    SymbolKind::Constant,
                    Regex::new(r"^([A-Z][A-Z0-9_]*)\s*=").unwrap(),
                ),
            ],
            imports: vec![
                Regex::new(r"^from\s+([\w.]+)\s+import").unwrap(),
                Regex::new(r"^import\s+([\w.]+)").unwrap(),
            ],
        }
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for PythonParser {
    fn parse(&self, file: &SourceFile) -> Result<ParsedFile, StageError> {
        Ok(extract(file, "Python", &self.symbols, &self.imports))
    }
}

pub struct JsParser {
    symbols: Vec<(SymbolKind, Regex)>,
    imports: Vec<Regex>,
}

impl JsParser {
    pub fn new() -> Self {
        Self {
            symbols: vec![
                (
                    SymbolKind::Function,
                    Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)")
                        .unwrap(),
                ),
                (
                    SymbolKind::Type,
                    Regex::new(r"^\s*(?:export\s+)?(?:abstract\s+)?(?:class|interface|enum)\s+(\w+)")
                        .unwrap(),
                ),
                (
                    SymbolKind::Type,
                    Regex::new(r"^\s*(?:export\s+)?type\s+(\w+)\s*=").unwrap(),
                ),
                (
                    SymbolKind::Constant,
                    Regex::new(r"^\s*(?:export\s+)?const\s+([A-Z][A-Z0-9_]*)\s*=").unwrap(),
                ),
            ],
            imports: vec![
                Regex::new(r#"^\s*import\s+.*from\s+['"]([^'"]+)['"]"#).unwrap(),
                Regex::new(r#"^\s*import\s+['"]([^'"]+)['"]"#).unwrap(),
                Regex::new(r#"require\(['"]([^'"]+)['"]\)"#).unwrap(),
            ],
        }
    }
}

impl Default for JsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for JsParser {
    fn parse(&self, file: &SourceFile) -> Result<ParsedFile, StageError> {
        let language = file.language.as_deref().unwrap_or("JavaScript");
        Ok(extract(file, language, &self.symbols, &self.imports))
    }
}

pub struct GoParser {
    symbols: Vec<(SymbolKind, Regex)>,
    imports: Vec<Regex>,
    import_block_start: Regex,
    import_block_line: Regex,
}

impl GoParser {
    pub fn new() -> Self {
        Self {
            symbols: vec![
                (
                    SymbolKind::Function,
                    Regex::new(r"^func\s+(?:\([^)]*\)\s+)?(\w+)").unwrap(),
                ),
                (SymbolKind::Type, Regex::new(r"^type\s+(\w+)").unwrap()),
                (
                    SymbolKind::Constant,
                    Regex::new(r"^const\s+(\w+)").unwrap(),
                ),
            ],
            imports: vec![Regex::new(r#"^import\s+"([^"]+)""#).unwrap()],
            import_block_start: Regex::new(r"^import\s+\(").unwrap(),
            import_block_line: Regex::new(r#"^\s*(?:\w+\s+)?"([^"]+)""#).unwrap(),
        }
    }
}

impl Default for GoParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for GoParser {
    fn parse(&self, file: &SourceFile) -> Result<ParsedFile, StageError> {
        let mut parsed = extract(file, "Go", &self.symbols, &self.imports);

        // Grouped import blocks need line-pair context the shared scanner
        // does not track.
        let mut in_block = false;
        let mut seen: HashSet<String> = parsed.imports.iter().cloned().collect();
        for line in file.content.lines() {
            if in_block {
                if line.trim_start().starts_with(')') {
                    in_block = false;
                    continue;
                }
                if let Some(captures) = self.import_block_line.captures(line) {
                    if let Some(name) = captures.get(1) {
                        let name = name.as_str().to_string();
                        if seen.insert(name.clone()) {
                            parsed.imports.push(name);
                        }
                    }
                }
            } else if self.import_block_start.is_match(line) {
                in_block = true;
            }
        }
        Ok(parsed)
    }
}
