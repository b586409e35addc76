//! Lyrics stage: text by section
//!
//! Skips content generation entirely for instrumental requests and for
//! `lyrics_option = none`; the stage still runs so its output field is
//! always written. Custom lyrics are distributed over the singable
//! sections; auto lyrics come from the model. Fallback is a placeholder
//! sheet plus a diagnostic.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::Stage;
use crate::error::Result;
use crate::generation::{parse_payload, GenerationClient};
use crate::state::{ArrangementPlan, LyricSection, LyricSheet, LyricsOption, SharedState};
use crate::workflow::StageId;

pub struct LyricsStage {
    client: Arc<dyn GenerationClient>,
}

impl LyricsStage {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    fn build_prompt(&self, state: &SharedState, arrangement: &ArrangementPlan) -> String {
        let singable: Vec<&str> = arrangement
            .sections
            .iter()
            .filter(|s| s.is_singable())
            .map(|s| s.name.as_str())
            .collect();
        let mut prompt = String::from(
            "Write a lyric sheet for the song as JSON: \
             {\"sections\": [{\"section\": \"<name>\", \"lines\": [\"...\"]}]}. \
             Use only the section names listed.\n",
        );
        prompt.push_str(&format!(
            "Song idea: {}\nSections: {}\n",
            state.request.song_idea,
            singable.join(", ")
        ));
        if let Some(mood) = &state.request.mood {
            prompt.push_str(&format!("Mood: {mood}\n"));
        }
        prompt
    }

    /// Splits user-provided lyrics into paragraphs and lays them over
    /// the singable sections in order, cycling if the text runs short.
    fn distribute_custom(text: &str, arrangement: &ArrangementPlan) -> LyricSheet {
        let paragraphs: Vec<Vec<String>> = text
            .split("\n\n")
            .map(|p| {
                p.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .filter(|p: &Vec<String>| !p.is_empty())
            .collect();

        let singable: Vec<&str> = arrangement
            .sections
            .iter()
            .filter(|s| s.is_singable())
            .map(|s| s.name.as_str())
            .collect();

        if paragraphs.is_empty() || singable.is_empty() {
            return LyricSheet::default();
        }

        let sections = singable
            .iter()
            .enumerate()
            .map(|(i, name)| LyricSection {
                section: name.to_string(),
                lines: paragraphs[i % paragraphs.len()].clone(),
            })
            .collect();
        LyricSheet { sections }
    }

    fn fallback_sheet(arrangement: &ArrangementPlan, idea: &str) -> LyricSheet {
        let sections = arrangement
            .sections
            .iter()
            .filter(|s| s.is_singable())
            .map(|s| LyricSection {
                section: s.name.clone(),
                lines: vec![
                    format!("Humming through the {}", s.name),
                    format!("Thinking about {idea}"),
                ],
            })
            .collect();
        LyricSheet { sections }
    }
}

#[async_trait]
impl Stage for LyricsStage {
    fn id(&self) -> StageId {
        StageId::Lyrics
    }

    async fn run(&self, state: &mut SharedState) -> Result<()> {
        if !state.request.wants_vocals() {
            debug!("no vocals requested, writing empty lyric sheet");
            state.lyrics = Some(LyricSheet::default());
            return Ok(());
        }

        let arrangement = state.arrangement.clone().unwrap_or_default();

        let sheet = match state.request.lyrics_option {
            LyricsOption::None => LyricSheet::default(),
            LyricsOption::Custom => match &state.request.custom_lyrics {
                Some(text) if !text.trim().is_empty() => {
                    Self::distribute_custom(text, &arrangement)
                }
                _ => {
                    state.push_error(
                        StageId::Lyrics,
                        "custom lyrics requested but none provided; using placeholder lyrics",
                    );
                    Self::fallback_sheet(&arrangement, &state.request.song_idea)
                }
            },
            LyricsOption::Auto => {
                let prompt = self.build_prompt(state, &arrangement);
                match self.client.complete(&prompt).await {
                    Ok(raw) => match parse_payload::<LyricsPayload>(&raw) {
                        Ok(payload) => {
                            let known: std::collections::BTreeSet<&str> = arrangement
                                .sections
                                .iter()
                                .map(|s| s.name.as_str())
                                .collect();
                            let mut sections = Vec::new();
                            for s in payload.sections {
                                let name = s.section.trim().to_ascii_lowercase();
                                if !known.contains(name.as_str()) {
                                    state.push_error(
                                        StageId::Lyrics,
                                        format!(
                                            "dropping lyrics for unknown section '{name}'"
                                        ),
                                    );
                                    continue;
                                }
                                let lines: Vec<String> = s
                                    .lines
                                    .into_iter()
                                    .map(|l| l.trim().to_string())
                                    .filter(|l| !l.is_empty())
                                    .collect();
                                if !lines.is_empty() {
                                    sections.push(LyricSection { section: name, lines });
                                }
                            }
                            if sections.is_empty() {
                                state.push_error(
                                    StageId::Lyrics,
                                    "generated sheet was empty; using placeholder lyrics",
                                );
                                Self::fallback_sheet(&arrangement, &state.request.song_idea)
                            } else {
                                LyricSheet { sections }
                            }
                        }
                        Err(e) => {
                            state.push_error(
                                StageId::Lyrics,
                                format!("{e}; using placeholder lyrics"),
                            );
                            Self::fallback_sheet(&arrangement, &state.request.song_idea)
                        }
                    },
                    Err(e) => {
                        state.push_error(
                            StageId::Lyrics,
                            format!("provider call failed ({e}); using placeholder lyrics"),
                        );
                        Self::fallback_sheet(&arrangement, &state.request.song_idea)
                    }
                }
            }
        };

        debug!(sections = sheet.sections.len(), "lyric sheet written");
        state.lyrics = Some(sheet);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LyricsPayload {
    sections: Vec<LyricSectionPayload>,
}

#[derive(Debug, Deserialize)]
struct LyricSectionPayload {
    section: String,
    lines: Vec<String>,
}
