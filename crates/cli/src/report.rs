use context_search::{SemanticStatus, TurnResponse, VerdictSource};

pub fn render_response(response: &TurnResponse) -> String {
    let outcome = &response.outcome;
    let diag = &outcome.diagnostics;

    let mut out = String::new();
    out.push_str(&format!(
        "topic: {} ({})\n",
        outcome.topic.decision,
        verdict_label(outcome.topic.source)
    ));
    if outcome.retrieval_query != outcome.query {
        out.push_str(&format!(
            "retrieval query: {}\n",
            truncate_one_line(&outcome.retrieval_query, 160)
        ));
    }
    out.push_str(&format!(
        "candidates: lexical={} semantic={} ({}) fused={}\n",
        diag.lexical_hits,
        diag.semantic_hits,
        semantic_label(diag.semantic),
        diag.fused_candidates
    ));
    if !diag.technical_phrases.is_empty() {
        out.push_str(&format!("technical phrases: {}\n", diag.technical_phrases.join(", ")));
    }
    out.push_str(&format!(
        "packed: {} documents, {} tokens",
        outcome.documents.len(),
        diag.total_tokens
    ));
    if !diag.dropped_duplicates.is_empty() {
        out.push_str(&format!(", {} duplicates dropped", diag.dropped_duplicates.len()));
    }
    if !diag.skipped_oversized.is_empty() {
        out.push_str(&format!(", {} oversized skipped", diag.skipped_oversized.len()));
    }
    out.push_str("\n\n");

    for (idx, doc) in outcome.documents.iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. {}  {}\n",
            idx + 1,
            doc.id,
            truncate_one_line(&doc.content, 100)
        ));
    }
    out.push_str("\n---\n");
    out.push_str(&response.answer);
    out
}

fn verdict_label(source: VerdictSource) -> &'static str {
    match source {
        VerdictSource::NoHistory => "no history",
        VerdictSource::Strategy => "classified",
        VerdictSource::FailOpenTimeout => "classifier timed out",
        VerdictSource::FailOpenError => "classifier failed",
    }
}

fn semantic_label(status: SemanticStatus) -> &'static str {
    match status {
        SemanticStatus::Ok => "ok",
        SemanticStatus::Disabled => "disabled",
        SemanticStatus::TimedOut => "timed out",
        SemanticStatus::Failed => "failed",
    }
}

fn truncate_one_line(text: &str, max_chars: usize) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= max_chars {
        return line;
    }
    let mut truncated: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
