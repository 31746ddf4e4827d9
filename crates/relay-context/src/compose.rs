use crate::types::{BufferTurn, Citation, ConversationHit, KnowledgeHit, UserProfile};

const BUFFER_EXCERPT_CHARS: usize = 500;
const CONVERSATION_EXCERPT_CHARS: usize = 300;
const REMINDER: &str = "\nOnly cite facts present in the sections above; never invent a citation.\n";

pub struct Composed {
    pub prompt: String,
    pub citations: Vec<Citation>,
    pub sections_dropped: Vec<u8>,
}

/// Deterministic composition per §4.5.3: fixed section order, truncation,
/// and char/4-estimated token-budget enforcement dropping sections 5, 4,
/// 3 (in that order) until the prompt fits. Section 1 is never dropped.
pub fn compose(
    system_prompt: &str,
    profile: Option<&UserProfile>,
    buffer: &[BufferTurn],
    conversation_hits: &[ConversationHit],
    knowledge_hits: &[KnowledgeHit],
    max_context_tokens: usize,
) -> Composed {
    let mut conv_sorted = conversation_hits.to_vec();
    conv_sorted.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    let mut knowledge_sorted = knowledge_hits.to_vec();
    knowledge_sorted.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    let section1 = format!("{system_prompt}\n");
    let section2 = render_user_section(profile);
    let section3 = render_buffer_section(buffer);
    let section4 = render_conversation_section(&conv_sorted);
    let section5 = render_knowledge_section(&knowledge_sorted);

    let mut include4 = true;
    let mut include5 = true;
    let mut include3 = true;
    let mut dropped = Vec::new();

    loop {
        let candidate = render(
            &section1,
            &section2,
            if include3 { Some(&section3) } else { None },
            if include4 { Some(&section4) } else { None },
            if include5 { Some(&section5) } else { None },
        );
        let estimated_tokens = candidate.len() / 4;
        if estimated_tokens <= max_context_tokens || (!include3 && !include4 && !include5) {
            let citations = if include5 {
                knowledge_sorted
                    .iter()
                    .map(|h| Citation {
                        chunk_id: h.chunk_id.clone(),
                        document_id: h.document_id.clone(),
                        title: h.title.clone(),
                        similarity: h.similarity,
                    })
                    .collect()
            } else {
                Vec::new()
            };
            return Composed {
                prompt: candidate,
                citations,
                sections_dropped: dropped,
            };
        }
        if include5 {
            include5 = false;
            dropped.push(5);
        } else if include4 {
            include4 = false;
            dropped.push(4);
        } else {
            include3 = false;
            dropped.push(3);
        }
    }
}

fn render(
    section1: &str,
    section2: &str,
    section3: Option<&str>,
    section4: Option<&str>,
    section5: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str(section1);
    out.push_str(section2);
    if let Some(s) = section3 {
        out.push_str(s);
    }
    if let Some(s) = section4 {
        out.push_str(s);
    }
    if let Some(s) = section5 {
        out.push_str(s);
    }
    out.push_str(REMINDER);
    out
}

fn render_user_section(profile: Option<&UserProfile>) -> String {
    let Some(profile) = profile else {
        return String::new();
    };
    let mut out = String::from("\n## User\n");
    if let Some(name) = &profile.name {
        out.push_str(&format!("- name: {name}\n"));
    }
    if let Some(email) = &profile.email {
        out.push_str(&format!("- email: {email}\n"));
    }
    for (key, value) in &profile.attributes {
        out.push_str(&format!("- {key}: {value}\n"));
    }
    out
}

fn render_buffer_section(buffer: &[BufferTurn]) -> String {
    if buffer.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n## Recent Conversation\n");
    for turn in buffer {
        let content = clip(&turn.content, BUFFER_EXCERPT_CHARS);
        out.push_str(&format!("{}: {}\n", turn.role, content));
    }
    out
}

fn render_conversation_section(hits: &[ConversationHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n## Relevant Past Conversation\n");
    for hit in hits {
        let excerpt = clip(&hit.content, CONVERSATION_EXCERPT_CHARS);
        out.push_str(&format!("- (sim={:.2}) {}: {}\n", hit.similarity, hit.role, excerpt));
    }
    out
}

fn render_knowledge_section(hits: &[KnowledgeHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n## Relevant Knowledge\n");
    for hit in hits {
        let excerpt = clip(&hit.content, CONVERSATION_EXCERPT_CHARS);
        out.push_str(&format!("- [{}] {} (sim={:.2})\n", hit.title, excerpt, hit.similarity));
    }
    out
}

fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let clipped: String = s.chars().take(max_chars).collect();
        format!("{clipped}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_core::TurnId;

    fn hit(sim: f32, created_offset_secs: i64) -> ConversationHit {
        ConversationHit {
            turn_id: TurnId::new(),
            role: crate::types::Role::User,
            content: "hello".to_string(),
            similarity: sim,
            created_at: Utc::now() + chrono::Duration::seconds(created_offset_secs),
        }
    }

    #[test]
    fn section1_is_never_dropped() {
        let composed = compose("SYSTEM", None, &[], &[], &[], 0);
        assert!(composed.prompt.starts_with("SYSTEM"));
    }

    #[test]
    fn conversation_hits_sort_by_similarity_desc_then_recency() {
        let hits = vec![hit(0.5, 0), hit(0.9, -100), hit(0.9, 0)];
        let composed = compose("SYSTEM", None, &[], &hits, &[], 100_000);
        let pos_recent = composed.prompt.find("sim=0.90").unwrap();
        // the more-recent 0.9 hit should render before the older 0.9 hit;
        // both come before the 0.5 hit.
        let pos_low = composed.prompt.find("sim=0.50").unwrap();
        assert!(pos_recent < pos_low);
    }

    #[test]
    fn low_token_budget_drops_knowledge_before_conversation() {
        let knowledge = vec![KnowledgeHit {
            chunk_id: "c1".to_string(),
            document_id: "d1".to_string(),
            title: "Doc".to_string(),
            content: "x".repeat(2000),
            similarity: 0.9,
            created_at: Utc::now(),
        }];
        let conv = vec![hit(0.8, 0)];
        let composed = compose("SYSTEM", None, &[], &conv, &knowledge, 50);
        assert!(composed.sections_dropped.contains(&5));
        assert!(composed.citations.is_empty());
    }

    #[test]
    fn citations_match_section5_order() {
        let knowledge = vec![
            KnowledgeHit {
                chunk_id: "low".to_string(),
                document_id: "doc-low".to_string(),
                title: "Low".to_string(),
                content: "low".to_string(),
                similarity: 0.3,
                created_at: Utc::now(),
            },
            KnowledgeHit {
                chunk_id: "high".to_string(),
                document_id: "doc-high".to_string(),
                title: "High".to_string(),
                content: "high".to_string(),
                similarity: 0.9,
                created_at: Utc::now(),
            },
        ];
        let composed = compose("SYSTEM", None, &[], &[], &knowledge, 100_000);
        assert_eq!(composed.citations[0].chunk_id, "high");
        assert_eq!(composed.citations[1].chunk_id, "low");
    }
}
