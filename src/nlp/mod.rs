pub mod cue_rules;
pub mod llm_client;
pub mod task_extractor;
