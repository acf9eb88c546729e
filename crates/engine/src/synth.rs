// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt-synthesis seam.
//!
//! The real synthesizer is an external collaborator (the chat front-end
//! turns a user intent into a polished per-item template). The local
//! fallback is deterministic: intent plus a labelled slot for every payload
//! field, which is enough to run batches without the front-end.

use drover_core::Payload;

pub trait PromptSynthesizer: Send + Sync {
    /// Build a worker prompt template with `{placeholder}` slots from the
    /// user intent and a sample payload (the enumerator's shape hint).
    fn synthesize(&self, user_intent: &str, sample: Option<&Payload>) -> String;
}

pub struct TemplateSynthesizer;

impl PromptSynthesizer for TemplateSynthesizer {
    fn synthesize(&self, user_intent: &str, sample: Option<&Payload>) -> String {
        let mut template = String::new();
        template.push_str(user_intent.trim());
        template.push_str("\n\nYou are processing one item of a larger batch. Work only on this item.\n");
        if let Some(sample) = sample.filter(|s| !s.is_empty()) {
            template.push_str("\nItem data:\n");
            for key in sample.keys() {
                template.push_str(&format!("- {}: {{{}}}\n", key, key));
            }
        }
        template.push_str("\nWhen finished, summarize what you did for this item.");
        template
    }
}
