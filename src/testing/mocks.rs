//! Mock generation client and progress recorder

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Result, SongforgeError};
use crate::generation::GenerationClient;
use crate::progress::ProgressReporter;

/// Builder for a scripted mock provider.
///
/// Responses are keyed by a substring of the prompt, so one mock can
/// serve every stage of a run: each stage's prompt contains a stable
/// phrase ("composition parameters", "arrangement plan", ...).
pub struct MockGenerationClientBuilder {
    responses: Vec<(String, Result<String>)>,
    image_response: Result<String>,
    fail_all: bool,
    never_resolve: bool,
}

impl MockGenerationClientBuilder {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            image_response: Ok("https://img.example/mock-art.png".to_string()),
            fail_all: false,
            never_resolve: false,
        }
    }

    /// Scripts a successful completion for prompts containing `key`.
    /// Later entries take precedence, so a scripted scenario can start
    /// from a base script and override single stages.
    pub fn with_success(mut self, key: &str, response: &str) -> Self {
        self.responses.push((key.to_string(), Ok(response.to_string())));
        self
    }

    /// Scripts a provider error for prompts containing `key`.
    pub fn with_error(mut self, key: &str, error: &str) -> Self {
        self.responses.push((
            key.to_string(),
            Err(SongforgeError::Provider(error.to_string())),
        ));
        self
    }

    pub fn with_image(mut self, reference: &str) -> Self {
        self.image_response = Ok(reference.to_string());
        self
    }

    /// Every call (text and image) fails with a provider error.
    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Every call hangs forever; pair with a short engine deadline.
    pub fn never_resolving(mut self) -> Self {
        self.never_resolve = true;
        self
    }

    pub fn build(self) -> MockGenerationClient {
        MockGenerationClient {
            responses: self.responses,
            image_response: self.image_response,
            fail_all: self.fail_all,
            never_resolve: self.never_resolve,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for MockGenerationClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MockGenerationClient {
    responses: Vec<(String, Result<String>)>,
    image_response: Result<String>,
    fail_all: bool,
    never_resolve: bool,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockGenerationClient {
    pub fn builder() -> MockGenerationClientBuilder {
        MockGenerationClientBuilder::new()
    }

    /// Number of calls made so far (completions plus images).
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// True if any received prompt contains the given substring.
    pub fn saw_prompt(&self, key: &str) -> bool {
        self.prompts.lock().unwrap().iter().any(|p| p.contains(key))
    }

    fn clone_result(result: &Result<String>) -> Result<String> {
        match result {
            Ok(s) => Ok(s.clone()),
            Err(SongforgeError::Provider(m)) => Err(SongforgeError::Provider(m.clone())),
            Err(SongforgeError::Config(m)) => Err(SongforgeError::Config(m.clone())),
            Err(SongforgeError::Engine(m)) => Err(SongforgeError::Engine(m.clone())),
        }
    }
}

#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if self.never_resolve {
            futures::future::pending::<()>().await;
            unreachable!("pending future resolved");
        }
        if self.fail_all {
            return Err(SongforgeError::Provider(
                "mock provider configured to fail".to_string(),
            ));
        }
        for (key, response) in self.responses.iter().rev() {
            if prompt.contains(key.as_str()) {
                return Self::clone_result(response);
            }
        }
        Err(SongforgeError::Provider(format!(
            "mock has no scripted response for prompt: {}",
            prompt.lines().next().unwrap_or_default()
        )))
    }

    async fn generate_image(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push(format!("[image] {prompt}"));

        if self.never_resolve {
            futures::future::pending::<()>().await;
            unreachable!("pending future resolved");
        }
        if self.fail_all {
            return Err(SongforgeError::Provider(
                "mock provider configured to fail".to_string(),
            ));
        }
        Self::clone_result(&self.image_response)
    }
}

/// Progress sink that records every notification for assertions.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<(String, u8, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, u8, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.events.lock().unwrap().iter().map(|e| e.1).collect()
    }

    pub fn stage_ids(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|e| e.2.clone()).collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, message: &str, percent: u8, stage_id: &str) {
        self.events
            .lock()
            .unwrap()
            .push((message.to_string(), percent, stage_id.to_string()));
    }
}
