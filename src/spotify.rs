//! Spotify Web API client for the listener's personal data.
//!
//! Every request is followed by a fixed pause, which is the only rate-limit
//! handling. Tokens come from the environment: either an access token used
//! as-is, or a refresh token exchanged once at startup.

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::SpotifyCredentials;
use crate::error::{PipelineError, Result};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const REQUEST_PAUSE: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const TIME_RANGES: [&str; 3] = ["short_term", "medium_term", "long_term"];
pub const TOP_LIMIT: usize = 50;
pub const RECENTLY_PLAYED_LIMIT: usize = 50;
pub const AUDIO_FEATURES_BATCH: usize = 100;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Followers {
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub popularity: Option<u32>,
    pub followers: Option<Followers>,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Album {
    pub id: Option<String>,
    pub name: String,
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    pub album: Option<Album>,
    pub popularity: Option<u32>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub explicit: bool,
}

impl Track {
    /// All artist names joined with ", ".
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn primary_artist_id(&self) -> Option<String> {
        self.artists.first().and_then(|a| a.id.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayHistory {
    pub played_at: String,
    pub track: Track,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioFeatures {
    pub id: String,
    pub danceability: f64,
    pub energy: f64,
    pub key: i64,
    pub loudness: f64,
    pub mode: i64,
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo: f64,
    pub time_signature: i64,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    #[serde(default)]
    audio_features: Vec<Option<AudioFeatures>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

// ============================================================================
// API Seam
// ============================================================================

/// The endpoints the extraction stage reads.
pub trait SpotifyApi {
    fn current_user(&self) -> Result<UserProfile>;
    fn top_artists(&self, time_range: &str, limit: usize) -> Result<Vec<Artist>>;
    fn top_tracks(&self, time_range: &str, limit: usize) -> Result<Vec<Track>>;
    fn recently_played(&self, limit: usize) -> Result<Vec<PlayHistory>>;
    /// Features for up to [`AUDIO_FEATURES_BATCH`] ids; `None` where a track has none.
    fn audio_features(&self, ids: &[String]) -> Result<Vec<Option<AudioFeatures>>>;
}

pub struct SpotifyClient {
    client: Client,
    token: String,
}

impl SpotifyClient {
    /// Build a client, exchanging the refresh token first when needed.
    pub fn connect(credentials: &SpotifyCredentials) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let token = match credentials {
            SpotifyCredentials::AccessToken(token) => token.clone(),
            SpotifyCredentials::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => {
                let response = client
                    .post(TOKEN_URL)
                    .basic_auth(client_id, Some(client_secret))
                    .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())])
                    .send()
                    .map_err(|e| PipelineError::Connection {
                        target: TOKEN_URL.to_string(),
                        reason: e.to_string(),
                    })?;
                if !response.status().is_success() {
                    return Err(PipelineError::Connection {
                        target: TOKEN_URL.to_string(),
                        reason: format!("token refresh returned {}", response.status()),
                    });
                }
                response.json::<TokenResponse>()?.access_token
            }
        };

        Ok(Self { client, token })
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", API_BASE, path);
        debug!("GET {} {:?}", url, query);

        let response = self.client.get(&url).bearer_auth(&self.token).query(query).send();
        std::thread::sleep(REQUEST_PAUSE);
        let response = response?;

        if !response.status().is_success() {
            return Err(PipelineError::Api {
                endpoint: path.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.json()?)
    }
}

impl SpotifyApi for SpotifyClient {
    fn current_user(&self) -> Result<UserProfile> {
        self.get("/me", &[])
    }

    fn top_artists(&self, time_range: &str, limit: usize) -> Result<Vec<Artist>> {
        let page: Paging<Artist> = self.get(
            "/me/top/artists",
            &[("time_range", time_range.to_string()), ("limit", limit.to_string())],
        )?;
        Ok(page.items)
    }

    fn top_tracks(&self, time_range: &str, limit: usize) -> Result<Vec<Track>> {
        let page: Paging<Track> = self.get(
            "/me/top/tracks",
            &[("time_range", time_range.to_string()), ("limit", limit.to_string())],
        )?;
        Ok(page.items)
    }

    fn recently_played(&self, limit: usize) -> Result<Vec<PlayHistory>> {
        let page: Paging<PlayHistory> =
            self.get("/me/player/recently-played", &[("limit", limit.to_string())])?;
        Ok(page.items)
    }

    fn audio_features(&self, ids: &[String]) -> Result<Vec<Option<AudioFeatures>>> {
        let body: AudioFeaturesResponse = self.get("/audio-features", &[("ids", ids.join(","))])?;
        Ok(body.audio_features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_deserializes_with_missing_optionals() {
        let json = r#"{
            "id": "t1",
            "name": "Song",
            "artists": [{"id": "a1", "name": "First"}, {"id": "a2", "name": "Second"}],
            "album": {"id": "al1", "name": "Album", "release_date": "2020-03"},
            "popularity": 70,
            "duration_ms": 201000
        }"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.artist_names(), "First, Second");
        assert_eq!(track.primary_artist_id(), Some("a1".to_string()));
        assert!(!track.explicit);
    }

    #[test]
    fn test_audio_features_response_keeps_nulls() {
        let json = r#"{"audio_features": [null, {
            "id": "t1", "danceability": 0.5, "energy": 0.6, "key": 5, "loudness": -7.0,
            "mode": 1, "speechiness": 0.05, "acousticness": 0.1, "instrumentalness": 0.0,
            "liveness": 0.2, "valence": 0.4, "tempo": 120.0, "time_signature": 4,
            "type": "audio_features"
        }]}"#;
        let body: AudioFeaturesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.audio_features.len(), 2);
        assert!(body.audio_features[0].is_none());
        assert_eq!(body.audio_features[1].as_ref().unwrap().key, 5);
    }

    #[test]
    fn test_paging_without_items() {
        let page: Paging<Artist> = serde_json::from_str("{}").unwrap();
        assert!(page.items.is_empty());
    }
}
