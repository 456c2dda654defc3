//! Gemini `generateContent` REST adapter.

use super::{
    parse_candidates, parse_evolution_summary, parse_summary, AiGateway, EvolutionSummary, PetSummary,
    Portrait, ReferenceImage,
};
use crate::catalog::Candidate;
use crate::config::Settings;
use crate::model::{ChatMessage, ImageHandle, Pet, Role, Stage};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Clone)]
pub struct GeminiGateway {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    text_model: String,
    image_model: String,
    evolution_model: String,
    chat_temperature: f32,
}

impl GeminiGateway {
    pub fn new(settings: &Settings, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            text_model: settings.text_model.clone(),
            image_model: settings.image_model.clone(),
            evolution_model: settings.evolution_model.clone(),
            chat_temperature: settings.chat_temperature,
        })
    }

    async fn generate(&self, model: &str, body: Value) -> Result<GenerateResponse> {
        let url = format!("{}/models/{model}:generateContent", self.api_base);
        debug!(model, "generateContent");
        let resp = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{model} request failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{model} HTTP {status}: {}", detail.trim()));
        }

        resp.json().await.with_context(|| format!("{model} JSON parse failed"))
    }

    async fn generate_json(&self, model: &str, prompt: String) -> Result<String> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });
        self.generate(model, body).await?.text()
    }
}

#[async_trait]
impl AiGateway for GeminiGateway {
    async fn summarize(&self, description: &str) -> Result<PetSummary> {
        let text = self.generate_json(&self.text_model, summary_prompt(description)).await?;
        parse_summary(&text)
    }

    async fn generate_appearance(
        &self,
        portrait: &Portrait,
        reference: Option<&ReferenceImage>,
    ) -> Result<ImageHandle> {
        let mut parts = vec![json!({ "text": portrait_prompt(portrait) })];
        if let Some(img) = reference {
            parts.push(json!({
                "inlineData": { "mimeType": img.mime_type, "data": img.data_base64 }
            }));
        }
        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "imageConfig": { "aspectRatio": "1:1" } },
        });
        let resp = self.generate(&self.image_model, body).await?;
        resp.image().ok_or_else(|| anyhow!("no image in response"))
    }

    async fn converse(&self, pet: &Pet, history: &[ChatMessage], message: &str) -> Result<String> {
        let mut contents: Vec<Value> = history
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Model => "model",
                };
                json!({ "role": role, "parts": [{ "text": m.text }] })
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": message }] }));

        let body = json!({
            "systemInstruction": { "parts": [{ "text": companion_instruction(pet) }] },
            "contents": contents,
            "generationConfig": { "temperature": self.chat_temperature },
        });
        self.generate(&self.text_model, body).await?.text()
    }

    async fn extract_activities(&self, message: &str, existing: &[String]) -> Result<Vec<Candidate>> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": extraction_prompt(message, existing) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "name": { "type": "STRING" },
                            "icon": { "type": "STRING" },
                            "category": { "type": "STRING", "enum": ["food", "play", "rest"] }
                        },
                        "required": ["name", "icon", "category"]
                    }
                }
            },
        });
        let text = self.generate(&self.text_model, body).await?.text()?;
        parse_candidates(&text)
    }

    async fn summarize_evolution(&self, pet: &Pet, target: Stage) -> Result<EvolutionSummary> {
        let text = self
            .generate_json(&self.evolution_model, evolution_prompt(pet, target))
            .await?;
        parse_evolution_summary(&text)
    }
}

/* -----------------------------
   Wire shapes
------------------------------ */

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|c| c.parts.iter())
    }

    fn text(&self) -> Result<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("empty text response"));
        }
        Ok(text.to_string())
    }

    fn image(&self) -> Option<ImageHandle> {
        self.parts().find_map(|p| p.inline_data.as_ref()).map(|d| {
            let mime = d.mime_type.as_deref().unwrap_or("image/png");
            ImageHandle::new(format!("data:{mime};base64,{}", d.data))
        })
    }
}

/* -----------------------------
   Prompts
------------------------------ */

pub fn summary_prompt(description: &str) -> String {
    format!(
        "Based on this user request for a virtual pet: \"{description}\", give it a creative name, \
determine its species, and describe its personality. Return ONLY a valid JSON object with keys: \
name, species, personality."
    )
}

pub fn portrait_prompt(p: &Portrait) -> String {
    let accessories = if p.accessories.is_empty() {
        String::new()
    } else {
        format!("The pet is wearing: {}.", p.accessories.join(", "))
    };
    format!(
        "Create a high-quality, professional 3D character render of a virtual pet.\n\
Species: {}\n\
Stage: {}\n\
Description: {}\n\
Personality: {}\n\
{accessories}\n\
The background is a {}.\n\
Style: Stylized, vibrant, expressive, centered framing. If 'Adult' or 'Ancient', make it look more \
majestic and powerful. If 'Baby', make it extremely cute and small.",
        p.species, p.stage, p.description, p.personality, p.environment
    )
}

pub fn companion_instruction(pet: &Pet) -> String {
    format!(
        "You are {}, an AI companion.\n\
Evolution: {}. Personality: \"{}\".\n\
Location: {}.\n\n\
Your goal is to be a supportive and engaging friend.\n\
- Do NOT be repetitive. If you just asked about wellness, don't ask again.\n\
- Focus on reacting to what the user says naturally.\n\
- Only suggest or ask about real-world wellness habits (like stretching, drinking water, napping) \
if it fits the conversation flow.\n\
- You are a companion first, not a wellness coach. Keep the vibe casual and warm.\n\
- Keep responses very short (1-2 sentences). Use emojis sparingly but effectively.\n\
- If the user is sharing their day, just listen and respond like a friend.",
        pet.name, pet.stage, pet.personality, pet.environment
    )
}

pub fn extraction_prompt(message: &str, existing: &[String]) -> String {
    format!(
        "Analyze this message: \"{message}\".\n\
Extract any DISTINCT NEW real-world activities mentioned that are NOT similar to these existing \
ones: [{}].\n\
If the user mentions something that is basically the same as an existing item (e.g., \"nap\" vs \
\"power nap\"), DO NOT extract it.\n\n\
1. Healthy foods/drinks (food)\n\
2. Active play/hobbies (play)\n\
3. Relaxation/wellness methods (rest)\n\n\
Return a JSON array of objects with keys: \"name\", \"icon\" (emoji), and \"category\".\n\
Prioritize real-world wellness. Avoid science fiction or nonsensical items.",
        existing.join(", ")
    )
}

pub fn evolution_prompt(pet: &Pet, target: Stage) -> String {
    format!(
        "My virtual pet is evolving from {} to {target}.\n\
Name: {}. Species: {}. Personality: {}.\n\
Describe its evolved form and how its focus on wellness/care matures.\n\
Return ONLY a valid JSON object with keys: species, personality.",
        pet.stage, pet.name, pet.species, pet.personality
    )
}
