use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::services::embedding::vector;

pub type PresentationId = i64;
pub type UserId = i64;

/// Kind of subject an embedding belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Presentation,
    User,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Presentation => "presentation",
            SubjectKind::User => "user",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "presentation" => Ok(SubjectKind::Presentation),
            "user" => Ok(SubjectKind::User),
            other => Err(AppError::DataIntegrity(format!(
                "unknown subject type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub kind: SubjectKind,
    pub id: i64,
}

impl SubjectKey {
    pub fn presentation(id: PresentationId) -> Self {
        Self {
            kind: SubjectKind::Presentation,
            id,
        }
    }

    pub fn user(id: UserId) -> Self {
        Self {
            kind: SubjectKind::User,
            id,
        }
    }
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One stored vector per (subject, model)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectEmbedding {
    pub subject: SubjectKey,
    pub model: String,
    pub dims: usize,
    /// Little-endian packed f32 values
    pub vector_bytes: Vec<u8>,
    pub normalized: bool,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubjectEmbedding {
    /// Decode the packed vector, checking it against `dims`.
    pub fn decode(&self) -> Result<Vec<f32>> {
        let values = vector::unpack(&self.vector_bytes)?;
        if values.len() != self.dims {
            return Err(AppError::DataIntegrity(format!(
                "{} ({}): decoded {} values but dims is {}",
                self.subject,
                self.model,
                values.len(),
                self.dims
            )));
        }
        if !vector::is_finite(&values) {
            return Err(AppError::DataIntegrity(format!(
                "{} ({}): vector contains non-finite values",
                self.subject, self.model
            )));
        }
        Ok(values)
    }

    /// Decoded vector scaled to unit length when the row is not normalized yet.
    pub fn unit_vector(&self) -> Result<Vec<f32>> {
        let mut values = self.decode()?;
        if !self.normalized {
            vector::normalize(&mut values);
        }
        Ok(values)
    }
}

/// A ranked similar presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub presentation_id: PresentationId,
    pub model: String,
    /// Dense rank starting at 1
    pub rank: u32,
    pub neighbor_id: PresentationId,
    pub score: f32,
    pub updated_at: DateTime<Utc>,
}

/// Neighbor selected by the similarity pass, before rank assignment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredNeighbor {
    pub neighbor_id: PresentationId,
    pub score: f32,
}

/// Aggregated category / keyword interests of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    pub user_id: UserId,
    pub fav_categories: BTreeMap<String, f64>,
    pub fav_keywords: BTreeMap<String, f64>,
    pub updated_at: DateTime<Utc>,
}

impl UserPreference {
    pub fn is_empty(&self) -> bool {
        self.fav_categories.is_empty() && self.fav_keywords.is_empty()
    }

    pub fn top_categories(&self) -> Vec<(&str, f64)> {
        sorted_by_weight(&self.fav_categories)
    }

    pub fn top_keywords(&self) -> Vec<(&str, f64)> {
        sorted_by_weight(&self.fav_keywords)
    }
}

fn sorted_by_weight(map: &BTreeMap<String, f64>) -> Vec<(&str, f64)> {
    let mut entries: Vec<(&str, f64)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    entries
}

/// Catalog read model of a presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationRecord {
    pub id: PresentationId,
    pub owner_id: UserId,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub description: Option<String>,
    pub quality_score: f64,
    /// Imported from an external source
    pub is_ingested: bool,
    pub is_published: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub likes_count: i64,
    pub comments_count: i64,
    pub follows_count: i64,
    pub bookmarks_count: i64,
}

impl PresentationRecord {
    pub fn engagement_total(&self) -> i64 {
        self.likes_count + self.comments_count + self.follows_count + self.bookmarks_count
    }

    /// Eligible presentations are frozen after their first embedding.
    pub fn is_eligible(&self, min_quality_score: f64) -> bool {
        self.is_ingested || self.quality_score >= min_quality_score
    }

    pub fn primary_category(&self) -> Option<&str> {
        self.categories.first().map(String::as_str)
    }
}

/// Interaction type with its implicit profile weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    View,
    Click,
    Follow,
    Like,
    Bookmark,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Click => "click",
            Self::Follow => "follow",
            Self::Like => "like",
            Self::Bookmark => "bookmark",
        }
    }
}

impl FromStr for InteractionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "view" => Ok(Self::View),
            "click" => Ok(Self::Click),
            "follow" => Ok(Self::Follow),
            "like" => Ok(Self::Like),
            "bookmark" | "save" => Ok(Self::Bookmark),
            other => Err(AppError::DataIntegrity(format!(
                "unknown interaction type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Interaction joined with the tags of the interacted presentation
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRecord {
    pub user_id: UserId,
    pub presentation_id: PresentationId,
    pub kind: InteractionType,
    pub occurred_at: DateTime<Utc>,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presentation(quality_score: f64, is_ingested: bool) -> PresentationRecord {
        PresentationRecord {
            id: 1,
            owner_id: 10,
            categories: vec!["health".into()],
            keywords: vec![],
            description: None,
            quality_score,
            is_ingested,
            is_published: true,
            is_deleted: false,
            created_at: Utc::now(),
            likes_count: 1,
            comments_count: 2,
            follows_count: 3,
            bookmarks_count: 4,
        }
    }

    #[test]
    fn test_eligibility() {
        assert!(presentation(0.0, true).is_eligible(12.0));
        assert!(presentation(12.0, false).is_eligible(12.0));
        assert!(!presentation(11.9, false).is_eligible(12.0));
    }

    #[test]
    fn test_engagement_total() {
        assert_eq!(presentation(0.0, false).engagement_total(), 10);
    }

    #[test]
    fn test_parse_interaction_type() {
        assert_eq!("VIEW".parse::<InteractionType>().unwrap(), InteractionType::View);
        assert_eq!("save".parse::<InteractionType>().unwrap(), InteractionType::Bookmark);
        assert!("share".parse::<InteractionType>().is_err());
    }

    #[test]
    fn test_decode_rejects_dims_mismatch() {
        let now = Utc::now();
        let row = SubjectEmbedding {
            subject: SubjectKey::presentation(1),
            model: "m".into(),
            dims: 3,
            vector_bytes: vector::pack(&[1.0, 2.0]),
            normalized: false,
            content_hash: String::new(),
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(row.decode(), Err(AppError::DataIntegrity(_))));
    }

    #[test]
    fn test_decode_rejects_non_finite_values() {
        let now = Utc::now();
        let row = SubjectEmbedding {
            subject: SubjectKey::presentation(1),
            model: "m".into(),
            dims: 2,
            vector_bytes: vector::pack(&[f32::NAN, 1.0]),
            normalized: true,
            content_hash: String::new(),
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(row.decode(), Err(AppError::DataIntegrity(_))));
        assert!(row.unit_vector().is_err());
    }

    #[test]
    fn test_unit_vector_normalizes_raw_rows() {
        let now = Utc::now();
        let row = SubjectEmbedding {
            subject: SubjectKey::presentation(1),
            model: "m".into(),
            dims: 2,
            vector_bytes: vector::pack(&[3.0, 4.0]),
            normalized: false,
            content_hash: String::new(),
            created_at: now,
            updated_at: now,
        };
        let unit = row.unit_vector().unwrap();
        assert!((unit[0] - 0.6).abs() < 1e-6);
        assert!((unit[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_top_categories_sorted_by_weight() {
        let mut categories = BTreeMap::new();
        categories.insert("art".to_string(), 1.0);
        categories.insert("health".to_string(), 3.0);
        categories.insert("tech".to_string(), 3.0);
        let pref = UserPreference {
            user_id: 1,
            fav_categories: categories,
            fav_keywords: BTreeMap::new(),
            updated_at: Utc::now(),
        };
        let top: Vec<&str> = pref.top_categories().into_iter().map(|(k, _)| k).collect();
        assert_eq!(top, vec!["health", "tech", "art"]);
    }
}
