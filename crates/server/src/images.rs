//! Remote-image inlining for Gemini-bound requests.
//!
//! The engine never performs I/O, so `http(s)` image URLs would otherwise
//! travel as `fileData` references Gemini cannot fetch. Before translation
//! the frontend downloads each distinct URL once (10 second ceiling) and
//! rewrites it into a `data:` URI; failures leave the URL untouched.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use transllm::ir::{ContentBlock, CoreRequest, MessageContent};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MEDIA_TYPE: &str = "image/jpeg";

pub(crate) async fn inline_remote_images(request: &mut CoreRequest, client: &reqwest::Client) {
    let mut fetched: HashMap<String, Option<String>> = HashMap::new();

    for message in &mut request.messages {
        let MessageContent::Blocks(blocks) = &mut message.content else {
            continue;
        };
        for block in blocks {
            let ContentBlock::ImageUrl { url, .. } = block else {
                continue;
            };
            if !url.starts_with("http://") && !url.starts_with("https://") {
                continue;
            }

            let data_uri = match fetched.get(url.as_str()) {
                Some(cached) => cached.clone(),
                None => {
                    let result = fetch_as_data_uri(client, url).await;
                    fetched.insert(url.clone(), result.clone());
                    result
                }
            };

            if let Some(data_uri) = data_uri {
                *url = data_uri;
            }
        }
    }
}

async fn fetch_as_data_uri(client: &reqwest::Client, url: &str) -> Option<String> {
    let response = match client.get(url).timeout(FETCH_TIMEOUT).send().await {
        Ok(response) => response,
        Err(err) => {
            log::warn!("image fetch failed for {url}: {err}");
            return None;
        }
    };

    if !response.status().is_success() {
        log::warn!("image fetch for {url} returned {}", response.status());
        return None;
    }

    let media_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| value.starts_with("image/"))
        .unwrap_or(DEFAULT_MEDIA_TYPE)
        .to_string();

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("image download failed for {url}: {err}");
            return None;
        }
    };

    Some(format!("data:{media_type};base64,{}", BASE64.encode(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use transllm::ir::{Message, Role};

    #[tokio::test]
    async fn data_uris_and_plain_text_are_left_alone() {
        let client = reqwest::Client::new();
        let mut request = CoreRequest {
            model: "gemini-2.0-flash".to_string(),
            messages: vec![Message::blocks(
                Role::User,
                vec![
                    ContentBlock::Text {
                        text: "what is this?".to_string(),
                    },
                    ContentBlock::ImageUrl {
                        url: "data:image/png;base64,aGk=".to_string(),
                        detail: None,
                    },
                ],
            )],
            ..Default::default()
        };

        inline_remote_images(&mut request, &client).await;

        let MessageContent::Blocks(blocks) = &request.messages[0].content else {
            unreachable!();
        };
        let ContentBlock::ImageUrl { url, .. } = &blocks[1] else {
            unreachable!();
        };
        assert_eq!(url, "data:image/png;base64,aGk=");
    }
}
