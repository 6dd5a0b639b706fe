use async_trait::async_trait;

use crate::fail;
use wikicore::{
    PageCategory, RunState, Stage, StageContext, StageError, StageId, Wiki, WikiPage, WikiPageRef,
};

/// Assembles the final wiki from documentation and diagrams. The wiki is
/// built as one value and attached once; no partial output is published.
pub struct BuildWikiStage;

impl BuildWikiStage {
    pub fn new() -> Self {
        Self
    }

    fn assemble(&self, state: &RunState) -> Result<Wiki, StageError> {
        let documentation = state.require_documentation()?;
        let diagrams = state.require_diagrams()?;
        let mut pages = Vec::new();

        pages.push(WikiPage {
            title: "Home".to_string(),
            path: "index.md".to_string(),
            content: documentation.overview.clone(),
            category: PageCategory::Overview,
        });
        pages.push(WikiPage {
            title: "Architecture".to_string(),
            path: "architecture.md".to_string(),
            content: documentation.architecture.clone(),
            category: PageCategory::Architecture,
        });
        for (module, content) in &documentation.modules {
            pages.push(WikiPage {
                title: module.clone(),
                path: format!("modules/{}.md", slug(module)),
                content: content.clone(),
                category: PageCategory::Module,
            });
        }
        for diagram in &diagrams.diagrams {
            pages.push(WikiPage {
                title: diagram.title.clone(),
                path: format!("diagrams/{}.md", slug(&diagram.title)),
                content: format!(
                    "# {}\n\n```mermaid\n{}```\n",
                    diagram.title, diagram.source
                ),
                category: PageCategory::Diagram,
            });
        }

        let structure = pages
            .iter()
            .map(|page| WikiPageRef {
                title: page.title.clone(),
                path: page.path.clone(),
            })
            .collect();

        Ok(Wiki { structure, pages })
    }
}

impl Default for BuildWikiStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for BuildWikiStage {
    fn id(&self) -> StageId {
        StageId::BuildWiki
    }

    async fn execute(&self, ctx: &StageContext, state: RunState) -> RunState {
        if state.has_error() {
            return state;
        }
        match self.assemble(&state) {
            Ok(wiki) => {
                ctx.events
                    .info(format!("Assembled wiki with {} pages", wiki.pages.len()));
                state.with_wiki(wiki)
            }
            Err(err) => fail(state, StageId::BuildWiki, err),
        }
    }
}

/// Filesystem- and URL-safe page name.
fn slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "page".to_string()
    } else {
        slug
    }
}
