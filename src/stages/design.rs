//! Design stage: album art
//!
//! The only stage that calls the image side of the provider. Art is
//! strictly optional: on any failure the song ships without it and a
//! diagnostic is recorded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::Stage;
use crate::error::Result;
use crate::generation::GenerationClient;
use crate::state::SharedState;
use crate::workflow::StageId;

pub struct DesignStage {
    client: Arc<dyn GenerationClient>,
}

impl DesignStage {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    fn build_prompt(&self, state: &SharedState) -> String {
        let mut prompt = format!(
            "Album art for a song about: {}. No text or lettering in the image.",
            state.request.song_idea
        );
        if let Some(mood) = &state.request.mood {
            prompt.push_str(&format!(" Mood: {mood}."));
        }
        if let Some(style) = &state.request.custom_style {
            prompt.push_str(&format!(" Style: {style}."));
        }
        prompt
    }
}

#[async_trait]
impl Stage for DesignStage {
    fn id(&self) -> StageId {
        StageId::Design
    }

    async fn run(&self, state: &mut SharedState) -> Result<()> {
        let prompt = self.build_prompt(state);
        match self.client.generate_image(&prompt).await {
            Ok(reference) => {
                debug!(art = %reference, "album art generated");
                state.album_art = Some(reference);
            }
            Err(e) => {
                state.push_error(
                    StageId::Design,
                    format!("image generation failed ({e}); shipping without album art"),
                );
                state.album_art = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRegistries;
    use crate::state::SongRequest;
    use crate::testing::mocks::MockGenerationClient;

    #[test]
    fn art_reference_is_recorded() {
        let client = Arc::new(
            MockGenerationClient::builder()
                .with_image("https://img.example/art-42.png")
                .build(),
        );
        let mut state = SharedState::new(
            SongRequest::new("dusk over the harbor"),
            Arc::new(ResourceRegistries::builtin()),
        );
        tokio_test::block_on(DesignStage::new(client).run(&mut state)).unwrap();
        assert_eq!(
            state.album_art.as_deref(),
            Some("https://img.example/art-42.png")
        );
    }

    #[test]
    fn failure_leaves_art_empty_with_diagnostic() {
        let client = Arc::new(MockGenerationClient::builder().failing().build());
        let mut state = SharedState::new(
            SongRequest::new("idea"),
            Arc::new(ResourceRegistries::builtin()),
        );
        tokio_test::block_on(DesignStage::new(client).run(&mut state)).unwrap();
        assert!(state.album_art.is_none());
        assert_eq!(state.errors.len(), 1);
    }
}
