use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CEFR proficiency band, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl Level {
    pub const ALL: [Level; 6] = [Level::A1, Level::A2, Level::B1, Level::B2, Level::C1, Level::C2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::A1 => "A1",
            Level::A2 => "A2",
            Level::B1 => "B1",
            Level::B2 => "B2",
            Level::C1 => "C1",
            Level::C2 => "C2",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Level::A1 => "Beginner",
            Level::A2 => "Elementary",
            Level::B1 => "Intermediate",
            Level::B2 => "Upper Intermediate",
            Level::C1 => "Advanced",
            Level::C2 => "Proficiency",
        }
    }

    pub fn descriptor(&self) -> &'static str {
        match self {
            Level::A1 => "Can understand and use familiar everyday expressions and very basic phrases aimed at the satisfaction of needs of a concrete type.",
            Level::A2 => "Can understand sentences and frequently used expressions related to areas of most immediate relevance and communicate in simple and routine tasks.",
            Level::B1 => "Can understand the main points of clear standard input on familiar matters and deal with most situations likely to arise while travelling.",
            Level::B2 => "Can understand the main ideas of complex text on both concrete and abstract topics and interact with a degree of fluency and spontaneity.",
            Level::C1 => "Can understand a wide range of demanding, longer texts and express ideas fluently and spontaneously without much obvious searching for expressions.",
            Level::C2 => "Can understand with ease virtually everything heard or read and express themselves spontaneously, very fluently and precisely.",
        }
    }

    /// Levels counted as a pass in the system analytics.
    pub fn is_pass(&self) -> bool {
        matches!(self, Level::B2 | Level::C1 | Level::C2)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A1" => Ok(Level::A1),
            "A2" => Ok(Level::A2),
            "B1" => Ok(Level::B1),
            "B2" => Ok(Level::B2),
            "C1" => Ok(Level::C1),
            "C2" => Ok(Level::C2),
            other => Err(format!("unknown level: {}", other)),
        }
    }
}

/// One value per level. The level set is closed, so this is a plain record
/// rather than a keyed map; the JSON form is an object keyed `"A1".."C2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LevelMap<T> {
    #[serde(rename = "A1", default)]
    pub a1: T,
    #[serde(rename = "A2", default)]
    pub a2: T,
    #[serde(rename = "B1", default)]
    pub b1: T,
    #[serde(rename = "B2", default)]
    pub b2: T,
    #[serde(rename = "C1", default)]
    pub c1: T,
    #[serde(rename = "C2", default)]
    pub c2: T,
}

impl<T> LevelMap<T> {
    pub fn from_fn(mut f: impl FnMut(Level) -> T) -> Self {
        Self {
            a1: f(Level::A1),
            a2: f(Level::A2),
            b1: f(Level::B1),
            b2: f(Level::B2),
            c1: f(Level::C1),
            c2: f(Level::C2),
        }
    }

    pub fn get(&self, level: Level) -> &T {
        match level {
            Level::A1 => &self.a1,
            Level::A2 => &self.a2,
            Level::B1 => &self.b1,
            Level::B2 => &self.b2,
            Level::C1 => &self.c1,
            Level::C2 => &self.c2,
        }
    }

    pub fn get_mut(&mut self, level: Level) -> &mut T {
        match level {
            Level::A1 => &mut self.a1,
            Level::A2 => &mut self.a2,
            Level::B1 => &mut self.b1,
            Level::B2 => &mut self.b2,
            Level::C1 => &mut self.c1,
            Level::C2 => &mut self.c2,
        }
    }

    /// Iterates in ascending level order.
    pub fn iter(&self) -> impl Iterator<Item = (Level, &T)> {
        Level::ALL.into_iter().map(move |level| (level, self.get(level)))
    }

    pub fn map<U>(&self, mut f: impl FnMut(Level, &T) -> U) -> LevelMap<U> {
        LevelMap::from_fn(|level| f(level, self.get(level)))
    }
}

impl<T: Clone> LevelMap<T> {
    pub fn splat(value: T) -> Self {
        Self::from_fn(|_| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_ascending() {
        let mut sorted = Level::ALL;
        sorted.sort();
        assert_eq!(sorted, Level::ALL);
        assert!(Level::A1 < Level::C2);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("b2".parse::<Level>(), Ok(Level::B2));
        assert!("D1".parse::<Level>().is_err());
    }

    #[test]
    fn level_map_json_uses_level_keys_and_defaults_missing() {
        let map: LevelMap<i32> = serde_json::from_str(r#"{"A1": 3, "C2": 1}"#).unwrap();
        assert_eq!(*map.get(Level::A1), 3);
        assert_eq!(*map.get(Level::B1), 0);
        assert_eq!(*map.get(Level::C2), 1);

        let json = serde_json::to_value(LevelMap::splat(60)).unwrap();
        assert_eq!(json["B2"], 60);
    }

    #[test]
    fn iter_follows_ladder_order() {
        let map = LevelMap::from_fn(|l| l.as_str().to_string());
        let keys: Vec<_> = map.iter().map(|(l, _)| l).collect();
        assert_eq!(keys, Level::ALL.to_vec());
    }
}
