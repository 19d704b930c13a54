//! Supported media sources and their URL checks.

use audiograb_core::{FetchError, ToolConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Placeholder replaced by the request URL in tool arguments
pub const URL_PLACEHOLDER: &str = "{url}";
/// Placeholder replaced by the staging directory in tool arguments
pub const DEST_PLACEHOLDER: &str = "{dest}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Spotify,
    YouTube,
    SoundCloud,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [Self::Spotify, Self::YouTube, Self::SoundCloud];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
            Self::YouTube => "youtube",
            Self::SoundCloud => "soundcloud",
        }
    }

    fn hosts(self) -> &'static [&'static str] {
        match self {
            Self::Spotify => &["open.spotify.com", "spotify.com"],
            Self::YouTube => &[
                "youtube.com",
                "www.youtube.com",
                "m.youtube.com",
                "music.youtube.com",
                "youtu.be",
            ],
            Self::SoundCloud => &["soundcloud.com", "www.soundcloud.com", "m.soundcloud.com"],
        }
    }

    /// Check that `raw` is an http(s) URL on one of this source's hosts.
    ///
    /// Runs before any history, pool or process work.
    pub fn validate(self, raw: &str) -> Result<Url, FetchError> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed)
            .map_err(|e| FetchError::invalid_source(trimmed, format!("not a valid URL: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::invalid_source(
                trimmed,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        let host = url
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| FetchError::invalid_source(trimmed, "URL has no host"))?;
        if !self.hosts().contains(&host.as_str()) {
            return Err(FetchError::invalid_source(
                trimmed,
                format!("host '{host}' is not a {self} URL"),
            ));
        }

        Ok(url)
    }

    /// Guess the source from the URL host
    pub fn detect(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.validate(raw).is_ok())
    }

    /// Tool invocation for this source
    pub fn tool_spec(self, tools: &ToolConfig) -> ToolSpec {
        match self {
            Self::Spotify => ToolSpec::new(
                &tools.spotdl_bin,
                [URL_PLACEHOLDER, "--output", DEST_PLACEHOLDER],
            ),
            Self::YouTube | Self::SoundCloud => {
                let mut args: Vec<String> = ["-P", DEST_PLACEHOLDER, "-x", "--audio-format", "mp3"]
                    .into_iter()
                    .map(String::from)
                    .collect();
                if let Some(ffmpeg) = &tools.ffmpeg_location {
                    args.push("--ffmpeg-location".to_string());
                    args.push(ffmpeg.display().to_string());
                }
                args.push(URL_PLACEHOLDER.to_string());
                ToolSpec {
                    program: tools.ytdlp_bin.clone(),
                    args,
                }
            }
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spotify" => Ok(Self::Spotify),
            "youtube" => Ok(Self::YouTube),
            "soundcloud" => Ok(Self::SoundCloud),
            other => Err(format!(
                "unknown source '{other}' (expected spotify, youtube or soundcloud)"
            )),
        }
    }
}

/// A program plus an argument template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments with the placeholders filled in. Substituted text is never
    /// scanned again, so a URL containing `{dest}` stays as it is.
    pub fn render(&self, url: &str, dest: &str) -> Vec<String> {
        self.args.iter().map(|arg| fill(arg, url, dest)).collect()
    }
}

fn fill(template: &str, url: &str, dest: &str) -> String {
    let mut out = String::with_capacity(template.len() + url.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(URL_PLACEHOLDER) {
            out.push_str(url);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(DEST_PLACEHOLDER) {
            out.push_str(dest);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
