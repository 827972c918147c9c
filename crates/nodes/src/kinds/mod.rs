//! Built-in `ExecutableNode` implementations — one module per kind tag
//! (spec §4.3).

mod llm_chain;
mod model_provider;
mod note;
mod output_sender;
mod trigger;

pub use llm_chain::LlmChainNode;
pub use model_provider::ModelProviderNode;
pub use note::NoteNode;
pub use output_sender::{HttpReportDispatcher, OutputSenderNode, ReportDispatcher};
pub use trigger::TriggerNode;

use std::sync::Arc;

use crate::providers::ProviderDispatcher;
use crate::traits::NodeRegistry;

/// Build the default registry: one instance of each built-in kind, wired
/// to the given `ProviderDispatcher`/`ReportDispatcher` for network effects.
pub fn default_registry(
    provider_dispatcher: Arc<dyn ProviderDispatcher>,
    report_dispatcher: Arc<dyn ReportDispatcher>,
) -> NodeRegistry {
    let mut registry: NodeRegistry = NodeRegistry::new();
    registry.insert("trigger".into(), Arc::new(TriggerNode));
    registry.insert("note".into(), Arc::new(NoteNode));
    registry.insert("modelProvider".into(), Arc::new(ModelProviderNode));
    registry.insert("basicLLMChain".into(), Arc::new(LlmChainNode::new(provider_dispatcher)));
    registry.insert("outputSender".into(), Arc::new(OutputSenderNode::new(report_dispatcher)));
    registry
}
