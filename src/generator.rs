use crate::api::LlmApi;
use crate::config::ProviderConfig;
use crate::models::FileMap;
use crate::parser;
use anyhow::Result;
use std::fmt::Write as _;
use std::sync::Arc;

/// Outcome of one generation round. `files` is always the complete set the
/// sandbox should run; `changed_files` is only present on iterative requests
/// and holds the keys that are new or differ from the prior round.
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub explanation: String,
    pub files: FileMap,
    pub changed_files: Option<FileMap>,
}

/// Turns a natural-language description into a generated file set by asking
/// the LLM for a completion and parsing it per the `FILE:` contract.
pub struct CodeGenerator {
    api: Arc<dyn LlmApi>,
    config: ProviderConfig,
}

impl CodeGenerator {
    pub fn new(api: Arc<dyn LlmApi>, config: ProviderConfig) -> Self {
        Self { api, config }
    }

    pub async fn generate(
        &self,
        api_key: &str,
        prompt: &str,
        existing_files: &FileMap,
    ) -> Result<GeneratedCode> {
        let full_prompt = build_prompt(prompt, existing_files);
        log::info!(
            "Requesting code generation ({} existing files in context)",
            existing_files.len()
        );

        let completion = self.api.complete(&self.config, api_key, &full_prompt).await?;
        let parsed = parser::parse_response(&completion);
        log::info!("Parsed {} files from completion", parsed.files.len());

        if existing_files.is_empty() {
            return Ok(GeneratedCode {
                explanation: parsed.explanation,
                files: parsed.files,
                changed_files: None,
            });
        }

        let (merged, changed) = parser::merge_files(existing_files, &parsed.files);
        Ok(GeneratedCode {
            explanation: parsed.explanation,
            files: merged,
            changed_files: Some(changed),
        })
    }
}

// Assembles the full generation prompt: base instruction, serialized existing
// files for iterative edits, then the response format the parser expects.
fn build_prompt(prompt: &str, existing_files: &FileMap) -> String {
    let mut full_prompt = format!(
        "Generate a React Native and Expo mobile app based on this description: \"{prompt}\"."
    );

    if existing_files.is_empty() {
        full_prompt
            .push_str("\n\nProvide a complete project structure with all necessary files for a working Expo app.");
    } else {
        full_prompt.push_str("\n\nHere are the existing files to modify or extend:\n");
        for (filename, content) in existing_files {
            let _ = write!(full_prompt, "\n--- {filename} ---\n{content}\n");
        }
        full_prompt.push_str(
            "\n\nPlease provide only the files that need to be changed or added. Explain your changes.",
        );
    }

    full_prompt.push_str(
        "\n\nRespond with a detailed explanation of what you built and how it works, followed by the code files.\n\
         For each file, use the format:\n\n\
         FILE: filename.js\n\
         ```\n\
         // file content here\n\
         ```\n\n\
         Do not use JSON format for your response.",
    );

    full_prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DeltaStream;
    use crate::models::ChatMessage;
    use async_trait::async_trait;

    struct FixedApi {
        completion: String,
    }

    #[async_trait]
    impl LlmApi for FixedApi {
        async fn complete(
            &self,
            _config: &ProviderConfig,
            _api_key: &str,
            _prompt: &str,
        ) -> Result<String> {
            Ok(self.completion.clone())
        }

        async fn stream_chat(
            &self,
            _config: &ProviderConfig,
            _api_key: &str,
            _system_prompt: &str,
            _messages: &[ChatMessage],
        ) -> Result<DeltaStream> {
            unimplemented!("generation tests never stream")
        }
    }

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            name: "test".to_string(),
            api_url: "http://localhost".to_string(),
            model: "test-model".to_string(),
            api_key_ref: None,
        }
    }

    fn generator(completion: &str) -> CodeGenerator {
        CodeGenerator::new(
            Arc::new(FixedApi {
                completion: completion.to_string(),
            }),
            provider_config(),
        )
    }

    #[test]
    fn fresh_prompts_ask_for_a_complete_project() {
        let prompt = build_prompt("a timer app", &FileMap::new());
        assert!(prompt.contains("a timer app"));
        assert!(prompt.contains("complete project structure"));
        assert!(prompt.contains("FILE: filename.js"));
    }

    #[test]
    fn iterative_prompts_embed_the_existing_files() {
        let existing: FileMap = [("App.js".to_string(), "old content".to_string())]
            .into_iter()
            .collect();
        let prompt = build_prompt("add a reset button", &existing);
        assert!(prompt.contains("--- App.js ---\nold content"));
        assert!(prompt.contains("only the files that need to be changed"));
    }

    #[tokio::test]
    async fn first_round_returns_parsed_files_without_a_diff() {
        let generator =
            generator("Built it.\n\nFILE: App.js\n```js\nexport default 1;\n```\n");
        let result = generator
            .generate("key", "an app", &FileMap::new())
            .await
            .unwrap();

        assert_eq!(result.explanation, "Built it.");
        assert_eq!(result.files["App.js"], "export default 1;");
        assert!(result.changed_files.is_none());
    }

    #[tokio::test]
    async fn iterative_round_merges_and_reports_changed_files() {
        let existing: FileMap = [
            ("App.js".to_string(), "unchanged".to_string()),
            ("util.js".to_string(), "old".to_string()),
        ]
        .into_iter()
        .collect();

        let generator = generator("Updated util.\n\nFILE: util.js\n```js\nnew\n```\n");
        let result = generator.generate("key", "tweak it", &existing).await.unwrap();

        assert_eq!(result.files.len(), 2);
        assert_eq!(result.files["App.js"], "unchanged");
        assert_eq!(result.files["util.js"], "new");

        let changed = result.changed_files.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed["util.js"], "new");
    }
}
