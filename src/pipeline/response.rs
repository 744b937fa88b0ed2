use std::collections::HashSet;

use crate::error::OpsError;
use crate::schemas::{
    AskResponse, Block, ExecutionTrace, NextAction, Reference, ReferenceKind, ResponseMeta,
};

/// Assembles the final structured answer: block ordering, reference
/// dedup, answer-text synthesis and metadata.
#[derive(Default)]
pub struct ResponseBuilder {
    route: String,
    blocks: Vec<Block>,
    references: Vec<Reference>,
    next_actions: Vec<NextAction>,
    used_tools: Vec<String>,
    answer: Option<String>,
    error: Option<OpsError>,
}

impl ResponseBuilder {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            ..Default::default()
        }
    }

    pub fn answer(&mut self, answer: impl Into<String>) -> &mut Self {
        self.answer = Some(answer.into());
        self
    }

    pub fn push_block(&mut self, block: Block) -> &mut Self {
        self.blocks.push(block);
        self
    }

    pub fn extend_blocks(&mut self, blocks: impl IntoIterator<Item = Block>) -> &mut Self {
        self.blocks.extend(blocks);
        self
    }

    /// References dedup on `(kind, locator)`; first occurrence wins.
    pub fn extend_references(
        &mut self,
        references: impl IntoIterator<Item = Reference>,
    ) -> &mut Self {
        let mut seen: HashSet<(ReferenceKind, String)> = self
            .references
            .iter()
            .map(|reference| (reference.kind, reference.locator.clone()))
            .collect();
        for reference in references {
            if seen.insert((reference.kind, reference.locator.clone())) {
                self.references.push(reference);
            }
        }
        self
    }

    pub fn used_tool(&mut self, tool: impl Into<String>) -> &mut Self {
        let tool = tool.into();
        if !self.used_tools.contains(&tool) {
            self.used_tools.push(tool);
        }
        self
    }

    pub fn next_action(&mut self, label: impl Into<String>, question: impl Into<String>) -> &mut Self {
        self.next_actions.push(NextAction {
            label: label.into(),
            question: question.into(),
        });
        self
    }

    pub fn error(&mut self, error: OpsError) -> &mut Self {
        self.error = Some(error);
        self
    }

    /// Synthesizes the answer text when none was set explicitly: the first
    /// text block, else a one-line summary of what was produced.
    fn synthesize_answer(&self) -> String {
        if let Some(answer) = &self.answer {
            return answer.clone();
        }
        for block in &self.blocks {
            if let Block::Text { text } = block {
                return text.clone();
            }
        }
        if let Some(error) = &self.error {
            return error.message.clone();
        }
        match self.blocks.len() {
            0 => "No data was produced for this question.".into(),
            count => format!("Produced {count} result block(s)."),
        }
    }

    pub fn build(mut self, trace: ExecutionTrace) -> AskResponse {
        let answer = self.synthesize_answer();
        let summary = match &self.error {
            Some(error) => format!("failed: {}", error.code),
            None => format!(
                "{} block(s) from {} tool(s)",
                self.blocks.len(),
                self.used_tools.len()
            ),
        };
        if !self.references.is_empty()
            && !self
                .blocks
                .iter()
                .any(|block| matches!(block, Block::References { .. }))
        {
            self.blocks.push(Block::References {
                references: self.references.clone(),
            });
        }
        AskResponse {
            answer,
            blocks: self.blocks,
            references: self.references,
            next_actions: self.next_actions,
            meta: ResponseMeta {
                route: self.route,
                used_tools: self.used_tools,
                summary,
                duration_ms: trace.duration_ms,
                error_code: self.error.as_ref().map(|error| error.code),
                message: self.error.as_ref().map(|error| error.message.clone()),
            },
            trace,
        }
    }
}
