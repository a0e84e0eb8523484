// Tiered Summarizer
//
// Compresses a contiguous range of conversation messages into a sectioned
// summary. Each message is scored into an importance tier:
// - High: kept near-verbatim
// - Medium: kept while the summary stays under the medium-tier budget
// - Low: omitted
//
// Summaries are incremental: a new summary carries every item of the prior
// one forward and extends its range.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::token_estimator::estimate;
use crate::models::{
    ChatMessage, ContextSummary, GenerationConfig, Message, MessageRole, TierThresholds,
};
use crate::services::ai::{GenerationError, GenerationResult, ModelClient};

// ============================================================================
// Vocabulary
// ============================================================================

static REQUIREMENT_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(must|shall|should|needs? to|required?|requires|requirements?|features?|users? (?:can|should|must)|support|allow|ability)\b",
    )
    .expect("Invalid requirement regex")
});

static DECISION_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(decided|decision|chose|choose|going with|prefer|architecture|database|framework|library|api|backend|frontend|stack|protocol|(?:will|to|we) use)\b",
    )
    .expect("Invalid decision regex")
});

static CONSTRAINT_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(constraints?|limits?|limited|limitation|deadline|budget|depends?|dependency|dependencies|compliance|must not|cannot|only|offline|latency|performance|security|privacy|within)\b",
    )
    .expect("Invalid constraint regex")
});

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+\S").expect("Invalid list regex")
});

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*[A-Za-z][\w .-]{0,40}:\s+\S").expect("Invalid key-value regex")
});

static DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d").expect("Invalid digit regex"));

/// Words that make up greetings, thanks and bare acknowledgements
static FILLER_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "hi", "hello", "hey", "thanks", "thank", "you", "ok", "okay", "k", "sure", "great",
        "cool", "got", "it", "yes", "yeah", "yep", "no", "nope", "sounds", "good", "perfect",
        "nice", "awesome", "alright", "right", "understood", "please", "continue", "go", "on",
        "appreciate", "much", "a", "lot", "that", "makes", "sense", "i", "see", "agreed",
    ]
    .into_iter()
    .collect()
});

/// Per-vocabulary cap on keyword hits
const MAX_KEYWORD_HITS: usize = 3;

/// Messages at least this long score an extra point
const LONG_MESSAGE_WORDS: usize = 30;

/// Longest overview kept, in characters
const OVERVIEW_MAX_CHARS: usize = 1200;

const EMPTY_SECTION: &str = "_None recorded._";

const OVERVIEW_PROMPT: &str = "\
You write the overview paragraph of a running project summary. \
Reply with two or three plain sentences describing what is being built and where the \
discussion stands. Only use facts from the notes. Do not use lists or headings.";

// ============================================================================
// Types
// ============================================================================

/// Importance tier of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Low,
    Medium,
    High,
}

/// Summary section, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Overview,
    CoreRequirements,
    TechnicalDecisions,
    ConstraintsDependencies,
    ImplementationNotes,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Overview,
        Section::CoreRequirements,
        Section::TechnicalDecisions,
        Section::ConstraintsDependencies,
        Section::ImplementationNotes,
    ];

    /// Item sections from least to most important
    const DROP_ORDER: [Section; 4] = [
        Section::ImplementationNotes,
        Section::ConstraintsDependencies,
        Section::TechnicalDecisions,
        Section::CoreRequirements,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Section::Overview => "Overview",
            Section::CoreRequirements => "Core Requirements",
            Section::TechnicalDecisions => "Technical Decisions",
            Section::ConstraintsDependencies => "Constraints & Dependencies",
            Section::ImplementationNotes => "Implementation Notes",
        }
    }

    fn from_title(title: &str) -> Option<Section> {
        Section::ALL.into_iter().find(|s| s.title() == title)
    }
}

/// One retained line of a summary
#[derive(Debug, Clone, PartialEq)]
struct SummaryItem {
    section: Section,
    text: String,
}

/// Trait for summarizers used by the context assembler
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `messages`, extending `prior` when given
    ///
    /// `messages` must be contiguous and start right after `prior`'s range
    /// (or at the first message of the conversation).
    async fn summarize(
        &self,
        messages: &[Message],
        prior: Option<&ContextSummary>,
    ) -> GenerationResult<ContextSummary>;
}

/// Heuristic tiered summarizer, optionally asking the model for the overview
pub struct TieredSummarizer {
    thresholds: TierThresholds,
    medium_tier_budget: usize,
    max_summary_tokens: usize,
    model: Option<Arc<dyn ModelClient>>,
}

impl TieredSummarizer {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            thresholds: config.tiers.clone(),
            medium_tier_budget: config.medium_tier_budget(),
            max_summary_tokens: config.max_summary_tokens(),
            model: None,
        }
    }

    /// Let the model write the Overview section
    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    /// Classify a message into an importance tier
    pub fn classify(&self, message: &Message) -> Tier {
        if self.is_filler(&message.content) {
            return Tier::Low;
        }

        let score = importance_score(&message.content);
        if score >= self.thresholds.high_score {
            Tier::High
        } else if score >= self.thresholds.medium_score {
            Tier::Medium
        } else {
            Tier::Low
        }
    }

    fn is_filler(&self, text: &str) -> bool {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();

        words.len() <= self.thresholds.filler_max_words
            && words.iter().all(|w| FILLER_WORDS.contains(w.as_str()))
    }

    fn to_item(&self, message: &Message) -> SummaryItem {
        let label = match message.role {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
            MessageRole::System => "System",
        };

        SummaryItem {
            section: route_section(&message.content),
            text: format!(
                "{}: {}",
                label,
                truncate_chars(&collapse_whitespace(&message.content), self.thresholds.max_item_chars)
            ),
        }
    }

    async fn model_overview(
        &self,
        model: &dyn ModelClient,
        items: &[SummaryItem],
        prior_overview: Option<&str>,
    ) -> GenerationResult<String> {
        let mut notes = String::new();
        if let Some(previous) = prior_overview {
            notes.push_str(&format!("Previous overview: {}\n\n", previous));
        }
        for section in &Section::ALL[1..] {
            notes.push_str(&format!("{}:\n", section.title()));
            for item in items.iter().filter(|i| i.section == *section) {
                notes.push_str(&format!("- {}\n", item.text));
            }
        }

        let response = model
            .complete(
                vec![ChatMessage::system(OVERVIEW_PROMPT), ChatMessage::user(notes)],
                CancellationToken::new(),
            )
            .await?;

        let overview = collapse_whitespace(&response);
        if overview.is_empty() {
            return Err(GenerationError::ModelError(
                "Model returned an empty overview".to_string(),
            ));
        }

        Ok(truncate_chars(&overview, OVERVIEW_MAX_CHARS))
    }

    /// Drop items oldest-first from the least important sections until the
    /// rendered summary fits `max_summary_tokens`
    fn enforce_cap(&self, overview: &str, items: &mut Vec<SummaryItem>) -> String {
        let mut text = render(overview, items);
        let mut dropped = 0usize;

        while estimate(&text) > self.max_summary_tokens {
            let victim = Section::DROP_ORDER
                .iter()
                .find_map(|section| items.iter().position(|i| i.section == *section));

            match victim {
                Some(index) => {
                    items.remove(index);
                    dropped += 1;
                    text = render(overview, items);
                }
                None => break,
            }
        }

        if dropped > 0 {
            log::warn!(
                "Summary exceeded {} tokens, dropped {} items",
                self.max_summary_tokens,
                dropped
            );
        }

        text
    }
}

#[async_trait]
impl Summarizer for TieredSummarizer {
    async fn summarize(
        &self,
        messages: &[Message],
        prior: Option<&ContextSummary>,
    ) -> GenerationResult<ContextSummary> {
        validate_range(messages, prior)?;

        let (first, last) = match (messages.first(), messages.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(GenerationError::InvalidInput(
                    "Nothing to summarize".to_string(),
                ))
            }
        };

        let (prior_overview, mut items) = match prior {
            Some(summary) => parse_summary(&summary.summary),
            None => (None, Vec::new()),
        };

        let tiers: Vec<Tier> = messages.iter().map(|m| self.classify(m)).collect();

        // High tier first, then medium while the budget allows
        let mut running: usize = items.iter().map(item_cost).sum();
        let mut retained: Vec<(usize, SummaryItem)> = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            if tiers[index] == Tier::High {
                let item = self.to_item(message);
                running += item_cost(&item);
                retained.push((index, item));
            }
        }
        for (index, message) in messages.iter().enumerate() {
            if tiers[index] == Tier::Medium {
                let item = self.to_item(message);
                let cost = item_cost(&item);
                if running + cost <= self.medium_tier_budget {
                    running += cost;
                    retained.push((index, item));
                }
            }
        }
        retained.sort_by_key(|(index, _)| *index);

        let kept = retained.len();
        let omitted = messages.len() - kept;
        items.extend(retained.into_iter().map(|(_, item)| item));

        let range_start = prior.map(|p| p.range_start).unwrap_or(first.sequence);
        let first_message_id = prior
            .map(|p| p.first_message_id.clone())
            .unwrap_or_else(|| first.id.clone());

        let range = (range_start, last.sequence);
        let summary = match &self.model {
            Some(model) => {
                let overview = self
                    .model_overview(model.as_ref(), &items, prior_overview.as_deref())
                    .await?;
                self.enforce_cap(&overview, &mut items)
            }
            None => {
                // Counts only shrink when capping, so the final overview still fits
                let draft = deterministic_overview(&items, range, omitted);
                self.enforce_cap(&draft, &mut items);
                render(&deterministic_overview(&items, range, omitted), &items)
            }
        };

        log::debug!(
            "[{}] Summarized messages {}-{}: kept {}, omitted {}",
            first.conversation_id,
            range_start,
            last.sequence,
            kept,
            omitted
        );

        Ok(ContextSummary {
            id: Uuid::new_v4().to_string(),
            conversation_id: first.conversation_id.clone(),
            token_count: estimate(&summary) as i64,
            summary,
            first_message_id,
            last_message_id: last.id.clone(),
            range_start,
            range_end: last.sequence,
            created_at: Utc::now(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn validate_range(messages: &[Message], prior: Option<&ContextSummary>) -> GenerationResult<()> {
    let Some(first) = messages.first() else {
        return Err(GenerationError::InvalidInput(
            "Nothing to summarize".to_string(),
        ));
    };

    let expected_start = prior.map(|p| p.range_end + 1).unwrap_or(1);
    if first.sequence != expected_start {
        return Err(GenerationError::InvalidInput(format!(
            "Summary input must start at message {}, got {}",
            expected_start, first.sequence
        )));
    }

    if let Some(prior) = prior {
        if prior.conversation_id != first.conversation_id {
            return Err(GenerationError::InvalidInput(
                "Prior summary belongs to another conversation".to_string(),
            ));
        }
    }

    for pair in messages.windows(2) {
        if pair[1].sequence != pair[0].sequence + 1 || pair[1].conversation_id != pair[0].conversation_id {
            return Err(GenerationError::InvalidInput(format!(
                "Summary input is not contiguous after message {}",
                pair[0].sequence
            )));
        }
    }

    Ok(())
}

fn importance_score(text: &str) -> u32 {
    let keyword_hits = [&*REQUIREMENT_TERMS, &*DECISION_TERMS, &*CONSTRAINT_TERMS]
        .iter()
        .map(|re| re.find_iter(text).count().min(MAX_KEYWORD_HITS))
        .sum::<usize>() as u32;

    let mut structure = 0;
    match LIST_ITEM.find_iter(text).count() {
        0 => {}
        1 | 2 => structure += 1,
        _ => structure += 2,
    }
    if text.contains("```") {
        structure += 2;
    }
    if KEY_VALUE.is_match(text) {
        structure += 1;
    }
    if DIGIT.is_match(text) {
        structure += 1;
    }

    let length_bonus = u32::from(text.split_whitespace().count() >= LONG_MESSAGE_WORDS);

    keyword_hits + structure + length_bonus
}

/// Route a message to the section whose vocabulary it matches most
fn route_section(text: &str) -> Section {
    let candidates = [
        (Section::CoreRequirements, REQUIREMENT_TERMS.find_iter(text).count()),
        (Section::TechnicalDecisions, DECISION_TERMS.find_iter(text).count()),
        (Section::ConstraintsDependencies, CONSTRAINT_TERMS.find_iter(text).count()),
    ];

    let mut best = (Section::ImplementationNotes, 0);
    for (section, hits) in candidates {
        if hits > best.1 {
            best = (section, hits);
        }
    }
    best.0
}

fn item_cost(item: &SummaryItem) -> usize {
    // "- " prefix and newline
    estimate(&item.text) + 1
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

fn deterministic_overview(items: &[SummaryItem], range: (i64, i64), omitted: usize) -> String {
    let count = |section: Section| items.iter().filter(|i| i.section == section).count();

    format!(
        "Covers messages {}-{}: {} requirements, {} technical decisions, {} constraints and {} implementation notes retained; {} low-importance messages omitted in the latest pass.",
        range.0,
        range.1,
        count(Section::CoreRequirements),
        count(Section::TechnicalDecisions),
        count(Section::ConstraintsDependencies),
        count(Section::ImplementationNotes),
        omitted
    )
}

fn render(overview: &str, items: &[SummaryItem]) -> String {
    let mut out = String::new();

    for section in Section::ALL {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("## {}\n", section.title()));

        if section == Section::Overview {
            out.push_str(overview);
            out.push('\n');
            continue;
        }

        let mut any = false;
        for item in items.iter().filter(|i| i.section == section) {
            out.push_str("- ");
            out.push_str(&item.text);
            out.push('\n');
            any = true;
        }
        if !any {
            out.push_str(EMPTY_SECTION);
            out.push('\n');
        }
    }

    out
}

/// Split a rendered summary back into its overview and items
fn parse_summary(text: &str) -> (Option<String>, Vec<SummaryItem>) {
    let mut overview: Vec<&str> = Vec::new();
    let mut items = Vec::new();
    let mut current: Option<Section> = None;

    for line in text.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            current = Section::from_title(title.trim());
            continue;
        }

        match current {
            Some(Section::Overview) if !line.trim().is_empty() => overview.push(line.trim()),
            Some(section) if section != Section::Overview => {
                if let Some(text) = line.strip_prefix("- ") {
                    items.push(SummaryItem {
                        section,
                        text: text.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    let overview = if overview.is_empty() {
        None
    } else {
        Some(overview.join(" "))
    };

    (overview, items)
}
