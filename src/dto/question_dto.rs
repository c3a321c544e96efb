use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::level::Level;
use crate::models::question::{Question, QuestionOption};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionPayload {
    /// Present when editing an existing option.
    pub id: Option<Uuid>,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuestionPayload {
    #[validate(length(min = 1, max = 1000))]
    pub text: String,
    pub level: Level,
    #[serde(default)]
    pub allow_multiple: bool,
    #[validate(length(min = 2, max = 8))]
    pub options: Vec<OptionPayload>,
}

impl QuestionPayload {
    /// Field rules plus the option rules: every option 1..=300 chars, exactly
    /// one correct option for single-select and at least one otherwise.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if let Some(pos) = self
            .options
            .iter()
            .position(|o| o.text.trim().is_empty() || o.text.chars().count() > 300)
        {
            return Err(Error::Invalid(format!(
                "Option {} must be between 1 and 300 characters",
                pos + 1
            )));
        }
        let correct = self.options.iter().filter(|o| o.is_correct).count();
        if self.allow_multiple && correct == 0 {
            return Err(Error::Invalid(
                "Multi-select questions need at least one correct option".into(),
            ));
        }
        if !self.allow_multiple && correct != 1 {
            return Err(Error::Invalid(
                "Single-select questions need exactly one correct option".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionListQuery {
    pub level: Option<Level>,
    pub include_archived: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionResponse {
    pub id: Uuid,
    pub text: String,
    pub is_correct: bool,
    pub position: i32,
}

impl From<QuestionOption> for OptionResponse {
    fn from(o: QuestionOption) -> Self {
        Self {
            id: o.id,
            text: o.text,
            is_correct: o.is_correct,
            position: o.position,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionResponse {
    pub id: Uuid,
    pub text: String,
    pub level: String,
    pub allow_multiple: bool,
    pub archived: bool,
    pub options: Vec<OptionResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuestionResponse {
    pub fn new(q: Question, options: Vec<QuestionOption>) -> Self {
        Self {
            id: q.id,
            text: q.text,
            level: q.level,
            allow_multiple: q.allow_multiple,
            archived: q.archived,
            options: options.into_iter().map(OptionResponse::from).collect(),
            created_at: q.created_at,
            updated_at: q.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(allow_multiple: bool, correct: &[bool]) -> QuestionPayload {
        QuestionPayload {
            text: "Choose the right form".into(),
            level: Level::B1,
            allow_multiple,
            options: correct
                .iter()
                .enumerate()
                .map(|(i, c)| OptionPayload {
                    id: None,
                    text: format!("option {}", i),
                    is_correct: *c,
                })
                .collect(),
        }
    }

    #[test]
    fn single_select_needs_exactly_one_correct() {
        assert!(payload(false, &[true, false]).check().is_ok());
        assert!(payload(false, &[true, true]).check().is_err());
        assert!(payload(false, &[false, false]).check().is_err());
    }

    #[test]
    fn multi_select_needs_at_least_one_correct() {
        assert!(payload(true, &[true, true, false]).check().is_ok());
        assert!(payload(true, &[false, false]).check().is_err());
    }

    #[test]
    fn option_count_bounds() {
        assert!(payload(false, &[true]).check().is_err());
        let nine = [true, false, false, false, false, false, false, false, false];
        assert!(payload(false, &nine).check().is_err());
    }

    #[test]
    fn blank_or_long_option_text_rejected() {
        let mut p = payload(false, &[true, false]);
        p.options[1].text = "   ".into();
        assert!(p.check().is_err());
        p.options[1].text = "x".repeat(301);
        assert!(p.check().is_err());
    }

    #[test]
    fn empty_question_text_rejected() {
        let mut p = payload(false, &[true, false]);
        p.text = String::new();
        assert!(matches!(p.check(), Err(Error::Validation(_))));
    }
}
