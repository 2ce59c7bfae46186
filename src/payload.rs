//! Game state payload returned by the scoring service
//!
//! Both `POST /upload` and `GET /game` answer with this shape. A decoded
//! payload is an immutable value; newer payloads replace older ones wholesale.

use serde::{Deserialize, Deserializer, Serialize};

/// Structured game state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "home")]
    pub home_team: TeamPayload,

    #[serde(rename = "away")]
    pub away_team: TeamPayload,

    /// Identifier used for subsequent polling (string or integer on the wire)
    #[serde(
        rename = "gameId",
        default,
        deserialize_with = "game_id_from_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub game_id: Option<String>,
}

/// One side of the game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamPayload {
    pub name: String,

    pub abbreviation: String,

    pub goals: u32,

    #[serde(rename = "onIce")]
    pub on_ice: Vec<Player>,
}

/// A player currently on the ice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    #[serde(rename = "fullName")]
    pub full_name: String,

    pub number: String,

    #[serde(rename = "positionCode")]
    pub position_code: String,
}

fn game_id_from_json<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawGameId {
        Text(String),
        Number(u64),
    }

    let raw = Option::<RawGameId>::deserialize(deserializer)?;
    Ok(raw.map(|id| match id {
        RawGameId::Text(text) => text,
        RawGameId::Number(number) => number.to_string(),
    }))
}

impl Payload {
    /// Decode a response body
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Identifier used to poll this game, if the service embedded a usable one
    pub fn game_key(&self) -> Option<&str> {
        self.game_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Message shown once the game has been recognised (away vs. home)
    pub fn following_message(&self) -> String {
        format!(
            "Now following {} vs. {}",
            self.away_team.name, self.home_team.name
        )
    }

    /// Compact score line for logs
    pub fn score_line(&self) -> String {
        format!(
            "{} {} - {} {}",
            self.away_team.display_code(),
            self.away_team.goals,
            self.home_team.goals,
            self.home_team.display_code()
        )
    }
}

impl TeamPayload {
    fn display_code(&self) -> &str {
        if self.abbreviation.is_empty() {
            &self.name
        } else {
            &self.abbreviation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAFS_BRUINS: &str = r#"{"home":{"name":"Leafs","abbreviation":"TOR","goals":3,"onIce":[{"fullName":"A B","number":"34","positionCode":"C"}]},"away":{"name":"Bruins","abbreviation":"BOS","goals":2,"onIce":[]}}"#;

    #[test]
    fn test_decode_leafs_bruins() {
        let payload = Payload::from_json(LEAFS_BRUINS.as_bytes()).unwrap();

        assert_eq!(payload.home_team.name, "Leafs");
        assert_eq!(payload.home_team.abbreviation, "TOR");
        assert_eq!(payload.home_team.goals, 3);
        assert_eq!(payload.home_team.on_ice.len(), 1);
        assert_eq!(payload.home_team.on_ice[0].full_name, "A B");
        assert_eq!(payload.home_team.on_ice[0].number, "34");
        assert_eq!(payload.home_team.on_ice[0].position_code, "C");
        assert_eq!(payload.away_team.name, "Bruins");
        assert!(payload.away_team.on_ice.is_empty());
        assert!(payload.game_id.is_none());
    }

    #[test]
    fn test_following_message_is_away_vs_home() {
        let payload = Payload::from_json(LEAFS_BRUINS.as_bytes()).unwrap();
        assert_eq!(payload.following_message(), "Now following Bruins vs. Leafs");
        assert_eq!(payload.score_line(), "BOS 2 - 3 TOR");
    }

    #[test]
    fn test_json_roundtrip_preserves_fields() {
        let json = r#"{"home":{"name":"Leafs","abbreviation":"TOR","goals":4,"onIce":[
            {"fullName":"Auston Matthews","number":"34","positionCode":"C"},
            {"fullName":"Mitch Marner","number":"16","positionCode":"R"},
            {"fullName":"Morgan Rielly","number":"44","positionCode":"D"}]},
            "away":{"name":"Bruins","abbreviation":"BOS","goals":1,"onIce":[
            {"fullName":"David Pastrnak","number":"88","positionCode":"R"}]},
            "gameId":"2019020789"}"#;
        let original = Payload::from_json(json.as_bytes()).unwrap();

        let encoded = serde_json::to_string(&original).unwrap();
        let decoded = Payload::from_json(encoded.as_bytes()).unwrap();

        assert_eq!(original, decoded);
        let numbers: Vec<&str> = decoded
            .home_team
            .on_ice
            .iter()
            .map(|p| p.number.as_str())
            .collect();
        assert_eq!(numbers, vec!["34", "16", "44"]);
    }

    fn with_game_id(game_id: &str) -> String {
        format!(
            r#"{{"home":{{"name":"Leafs","abbreviation":"TOR","goals":3,"onIce":[]}},"away":{{"name":"Bruins","abbreviation":"BOS","goals":2,"onIce":[]}},"gameId":{}}}"#,
            game_id
        )
    }

    #[test]
    fn test_numeric_game_id() {
        let payload = Payload::from_json(with_game_id("2019020789").as_bytes()).unwrap();
        assert_eq!(payload.game_id.as_deref(), Some("2019020789"));
        assert_eq!(payload.game_key(), Some("2019020789"));
    }

    #[test]
    fn test_game_key_requires_embedded_id() {
        let payload = Payload::from_json(LEAFS_BRUINS.as_bytes()).unwrap();
        assert_eq!(payload.game_key(), None);

        let payload = Payload::from_json(with_game_id(r#""  ""#).as_bytes()).unwrap();
        assert_eq!(payload.game_key(), None);

        let payload = Payload::from_json(with_game_id(r#"" 2017020001 ""#).as_bytes()).unwrap();
        assert_eq!(payload.game_key(), Some("2017020001"));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(Payload::from_json(b"not json").is_err());
        assert!(Payload::from_json(br#"{"home":{"name":"Leafs"}}"#).is_err());
        assert!(Payload::from_json(br#"{"home":{"name":"Leafs","abbreviation":"TOR","goals":3,"onIce":[]},"away":{"name":"Bruins","abbreviation":"BOS","goals":"two","onIce":[]}}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_incomplete_team() {
        // Names alone are not a game
        assert!(Payload::from_json(br#"{"home":{"name":"Leafs"},"away":{"name":"Bruins"}}"#).is_err());

        let missing_goals = br#"{"home":{"name":"Leafs","abbreviation":"TOR","onIce":[]},"away":{"name":"Bruins","abbreviation":"BOS","goals":2,"onIce":[]}}"#;
        assert!(Payload::from_json(missing_goals).is_err());

        let missing_on_ice = br#"{"home":{"name":"Leafs","abbreviation":"TOR","goals":3},"away":{"name":"Bruins","abbreviation":"BOS","goals":2,"onIce":[]}}"#;
        assert!(Payload::from_json(missing_on_ice).is_err());

        let missing_position = br#"{"home":{"name":"Leafs","abbreviation":"TOR","goals":3,"onIce":[{"fullName":"A B","number":"34"}]},"away":{"name":"Bruins","abbreviation":"BOS","goals":2,"onIce":[]}}"#;
        assert!(Payload::from_json(missing_position).is_err());
    }
}
