use super::{Delivered, RenderedPayload, Sender};
use anyhow::{anyhow, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://discord.com/api/v10";
/// Embed description limit.
const DESCRIPTION_MAX: usize = 4096;
/// Embeds sharing a `url` render as one gallery; Discord shows up to four.
const GALLERY_MAX: usize = 4;

/// Posts rich embeds to guild channels through the bot REST API.
#[derive(Clone)]
pub struct DiscordSender {
    token: String,
    api_base: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordSender {
    pub fn new(token: String) -> Self {
        Self {
            token,
            api_base: API_BASE.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    /// Reads `DISCORD_BOT_TOKEN`; `None` when unset or blank.
    pub fn from_env() -> Option<Self> {
        std::env::var("DISCORD_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn backoff(attempt: u8, retry_after: Option<f64>) -> Duration {
        match retry_after {
            Some(secs) if secs > 0.0 => Duration::from_secs_f64(secs.min(60.0)),
            _ => Duration::from_millis(500u64 << attempt.saturating_sub(1).min(6)),
        }
    }
}

#[async_trait::async_trait]
impl Sender for DiscordSender {
    async fn send(&self, channel_id: u64, payload: &RenderedPayload) -> Result<Delivered> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);
        let body = DiscordMessage::from_payload(payload);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&url)
                .header("Authorization", format!("Bot {}", self.token))
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(rsp) if rsp.status().is_success() => {
                    let created: CreatedMessage = rsp.json().await.unwrap_or_default();
                    return Ok(Delivered {
                        message_id: created.id,
                    });
                }
                Ok(rsp) => {
                    let status = rsp.status();
                    // 429 and 5xx are worth another go; other 4xx won't change.
                    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
                        rsp.json::<RateLimited>().await.ok().map(|r| r.retry_after)
                    } else {
                        None
                    };
                    if retryable && attempt < self.max_retries {
                        tokio::time::sleep(Self::backoff(attempt, retry_after)).await;
                        continue;
                    }
                    return Err(anyhow!("Discord HTTP error {status} for channel {channel_id}"));
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Self::backoff(attempt, None)).await;
                        continue;
                    }
                    return Err(anyhow!("Discord request failed: {e}"));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Deserialize, Default)]
struct CreatedMessage {
    id: Option<String>,
}

#[derive(Deserialize)]
struct RateLimited {
    retry_after: f64,
}

#[derive(Serialize, Debug, PartialEq)]
struct EmbedAuthor {
    name: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct EmbedImage {
    url: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize, Debug, PartialEq)]
struct EmbedFooter {
    text: String,
}

#[derive(Serialize, Debug, PartialEq, Default)]
struct DiscordEmbed {
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Serialize, Debug)]
struct DiscordMessage {
    embeds: Vec<DiscordEmbed>,
}

impl DiscordMessage {
    fn from_payload(p: &RenderedPayload) -> Self {
        let description = {
            let md = p.body_markdown();
            if md.is_empty() {
                None
            } else if md.chars().count() > DESCRIPTION_MAX {
                Some(super::render::truncate_with_link(&md, DESCRIPTION_MAX - 64, &p.url))
            } else {
                Some(md)
            }
        };

        // banner first, then gallery images as sibling embeds
        let mut images = p.banner_url.iter().chain(p.gallery.iter()).take(GALLERY_MAX);

        let main = DiscordEmbed {
            author: Some(EmbedAuthor {
                name: format!("{} {}", p.accent.icon(), p.headline),
            }),
            title: Some(p.title.clone()),
            url: p.url.clone(),
            description,
            color: Some(p.accent.color()),
            fields: p
                .fields
                .iter()
                .map(|f| EmbedField {
                    name: f.name.clone(),
                    value: f.value.clone(),
                    inline: false,
                })
                .collect(),
            image: images.next().map(|u| EmbedImage { url: u.clone() }),
            footer: Some(EmbedFooter {
                text: p.category.as_str().to_string(),
            }),
            timestamp: Some(p.timestamp.to_rfc3339()),
        };

        let mut embeds = vec![main];
        embeds.extend(images.map(|u| DiscordEmbed {
            url: p.url.clone(),
            image: Some(EmbedImage { url: u.clone() }),
            ..Default::default()
        }));
        Self { embeds }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::render::render;
    use crate::news::{Category, DescriptionBlock, NewsItem};
    use crate::tracker::Signal;
    use chrono::{TimeZone, Utc};

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(DiscordSender::backoff(1, None), Duration::from_millis(500));
        assert_eq!(DiscordSender::backoff(3, None), Duration::from_millis(2_000));
        assert_eq!(DiscordSender::backoff(200, None), Duration::from_millis(32_000));
        assert_eq!(DiscordSender::backoff(2, Some(1.5)), Duration::from_millis(1_500));
    }

    #[test]
    fn gallery_becomes_sibling_embeds_with_same_url() {
        let mut it = NewsItem::new(
            Category::Topic,
            "https://example.test/topic/1",
            "Patch notes",
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        );
        it.banner_url = Some("https://img/banner.png".into());
        it.description_blocks = Some(vec![
            DescriptionBlock::Text { markdown: "hi".into() },
            DescriptionBlock::MediaGallery {
                urls: (0..6).map(|i| format!("https://img/{i}.png")).collect(),
            },
        ]);
        let msg = DiscordMessage::from_payload(&render(&Signal::NewItem(it)));
        assert_eq!(msg.embeds.len(), GALLERY_MAX);
        assert_eq!(
            msg.embeds[0].image,
            Some(EmbedImage { url: "https://img/banner.png".into() })
        );
        assert!(msg.embeds.iter().all(|e| e.url == "https://example.test/topic/1"));
        assert_eq!(msg.embeds[0].color, Some(0xC8A24B));
    }

    #[test]
    fn rate_limit_backoff_uses_retry_after() {
        assert_eq!(DiscordSender::backoff(1, Some(1.5)), Duration::from_millis(1500));
        assert_eq!(DiscordSender::backoff(2, None), Duration::from_millis(1000));
    }
}
