//! Hand-authored portfolio records that make up the retrieval corpus.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Provenance of a chunk inside the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    /// Education and certifications.
    Resume,
    /// Project write-ups.
    Projects,
    /// Work history.
    Experience,
    /// Skill categories.
    Skills,
    /// Site metadata and social links.
    Social,
    /// Curated chatbot context (summary, interests, contact preferences).
    Context,
    /// Free-text narrative.
    About,
}

impl SourceTag {
    /// Every tag, in the order the indexer walks them.
    pub const ALL: [SourceTag; 7] = [
        SourceTag::Resume,
        SourceTag::Projects,
        SourceTag::Experience,
        SourceTag::Skills,
        SourceTag::Social,
        SourceTag::Context,
        SourceTag::About,
    ];

    /// Lowercase label stored alongside each row.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::Projects => "projects",
            Self::Experience => "experience",
            Self::Skills => "skills",
            Self::Social => "social",
            Self::Context => "context",
            Self::About => "about",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        SourceTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == value.trim())
            .ok_or_else(|| anyhow::anyhow!("unknown source tag '{value}'"))
    }
}

/// Site-wide identity details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    /// Subject's display name.
    pub name: String,
    /// Headline shown under the name.
    pub title: String,
    /// Public contact email.
    pub email: String,
    /// City / country.
    pub location: String,
    /// University currently attended.
    #[serde(default)]
    pub university: Option<String>,
    /// Degree in progress.
    #[serde(default)]
    pub degree: Option<String>,
    /// Expected graduation year.
    #[serde(default)]
    pub graduation_year: Option<String>,
}

/// External profile link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialLink {
    /// Link label (GitHub, LinkedIn, ...).
    pub name: String,
    /// Target URL.
    pub url: String,
}

/// Summary facts written specifically for the chat assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatbotContext {
    /// One-paragraph biography.
    pub summary: String,
    /// What the subject is doing right now.
    pub current_status: String,
    /// Topics the subject cares about.
    #[serde(default)]
    pub interests: Vec<String>,
    /// How the subject prefers to be contacted.
    pub contact_preferences: String,
}

/// Degree entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Education {
    /// Institution name.
    pub school: String,
    /// Degree title.
    pub degree: String,
    /// Human-readable date range.
    pub period: String,
    /// Campus location.
    pub location: String,
}

/// Education plus certifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resume {
    /// Degrees in reverse-chronological order.
    #[serde(default)]
    pub education: Vec<Education>,
    /// Certification titles.
    #[serde(default)]
    pub certifications: Vec<String>,
}

/// Portfolio project write-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Stable slug.
    pub id: String,
    /// Display title.
    pub title: String,
    /// One-line summary.
    pub description: String,
    /// Full write-up.
    pub long_description: String,
    /// Tech stack labels.
    #[serde(default)]
    pub technologies: Vec<String>,
    /// Whether the project is pinned on the site.
    #[serde(default)]
    pub featured: bool,
    /// Bullet-point accomplishments.
    #[serde(default)]
    pub highlights: Vec<String>,
    /// Repository / demo links.
    #[serde(default)]
    pub links: ProjectLinks,
}

/// Optional outbound links for a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectLinks {
    /// Source repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    /// Live demo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo: Option<String>,
}

/// Work history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    /// Stable slug.
    pub id: String,
    /// Employer.
    pub company: String,
    /// Job title.
    pub role: String,
    /// Human-readable date range.
    pub period: String,
    /// Office location or "Remote".
    pub location: String,
    /// Short role summary.
    pub description: String,
    /// Bullet-point accomplishments.
    #[serde(default)]
    pub achievements: Vec<String>,
    /// Tech stack labels.
    #[serde(default)]
    pub technologies: Vec<String>,
    /// Whether this is the current position.
    #[serde(default)]
    pub current: bool,
}

/// Named group of skills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillCategory {
    /// Stable slug.
    pub id: String,
    /// Category heading.
    pub title: String,
    /// Skill names.
    pub skills: Vec<String>,
}

/// Every structured record on the site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioContent {
    /// Identity details.
    pub site: SiteConfig,
    /// Curated assistant context.
    pub context: ChatbotContext,
    /// Education and certifications.
    #[serde(default)]
    pub resume: Resume,
    /// Project write-ups.
    #[serde(default)]
    pub projects: Vec<Project>,
    /// Work history.
    #[serde(default)]
    pub experience: Vec<Experience>,
    /// Skill groups.
    #[serde(default)]
    pub skills: Vec<SkillCategory>,
    /// Profile links.
    #[serde(default)]
    pub social: Vec<SocialLink>,
}

/// One source text handed to the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Where the text came from.
    pub source: SourceTag,
    /// Raw text to slice.
    pub text: String,
}

/// Structured records plus the free-text narrative.
#[derive(Debug, Clone)]
pub struct Corpus {
    content: PortfolioContent,
    about: String,
}

impl Corpus {
    /// Builds a corpus from already-parsed parts.
    pub fn new(content: PortfolioContent, about: impl Into<String>) -> Self {
        Self {
            content,
            about: about.into(),
        }
    }

    /// Reads the JSON records file and the narrative text file.
    pub fn load(content_path: &Path, about_path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(content_path)
            .with_context(|| format!("failed to read content records {:?}", content_path))?;
        let content: PortfolioContent = serde_json::from_str(&raw)
            .with_context(|| format!("invalid content records in {:?}", content_path))?;
        let about = fs::read_to_string(about_path)
            .with_context(|| format!("failed to read narrative {:?}", about_path))?;
        Ok(Self::new(content, about))
    }

    /// Name of the person the site is about.
    pub fn subject(&self) -> &str {
        &self.content.site.name
    }

    /// Renders every source into the text the indexer embeds.
    ///
    /// Structured sections are serialized as pretty JSON so field names stay
    /// next to their values in each slice. Empty sections are skipped.
    pub fn documents(&self) -> Result<Vec<SourceDocument>> {
        let content = &self.content;
        let mut documents = Vec::with_capacity(SourceTag::ALL.len());
        for source in SourceTag::ALL {
            let text = match source {
                SourceTag::Resume => render(&content.resume)?,
                SourceTag::Projects => render(&content.projects)?,
                SourceTag::Experience => render(&content.experience)?,
                SourceTag::Skills => render(&content.skills)?,
                SourceTag::Social => render(&SocialSection {
                    site: &content.site,
                    links: &content.social,
                })?,
                SourceTag::Context => render(&content.context)?,
                SourceTag::About => self.about.trim().to_string(),
            };
            if is_blank(&text) {
                continue;
            }
            documents.push(SourceDocument { source, text });
        }
        Ok(documents)
    }
}

#[derive(Serialize)]
struct SocialSection<'a> {
    site: &'a SiteConfig,
    links: &'a [SocialLink],
}

fn render<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to render content section")
}

fn is_blank(text: &str) -> bool {
    matches!(text.trim(), "" | "[]" | "{}")
}
