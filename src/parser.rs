/// One level of a path's prefix chain: `A:B:C` expands to records for `A`,
/// `A:B`, and `A:B:C`, because a path implicitly declares every ancestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    pub label: String,
    pub parent_label: Option<String>,
    pub path: String,
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedPaths {
    /// Prefix-chain records in input order. Duplicates across input paths are
    /// expected here; the builder dedupes.
    pub records: Vec<PathRecord>,
    pub total_paths: usize,
    pub valid_paths: usize,
    /// Original strings of the inputs that produced no usable chain.
    pub invalid_paths: Vec<String>,
}

/// Expand one raw path into its full prefix chain.
///
/// Leading/trailing colons and whitespace are stripped, empty segments from
/// doubled colons are dropped, and remaining segments are trimmed. A segment
/// that is whitespace-only invalidates the whole path; so does an input that
/// yields no segments at all. Returns `None` for invalid input.
pub fn expand_path(raw: &str) -> Option<Vec<PathRecord>> {
    let cleaned = raw.trim().trim_matches(':');
    if cleaned.is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    for segment in cleaned.split(':') {
        if segment.is_empty() {
            continue;
        }
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            // "A: :B" declares a level with no label; the path is unusable.
            return None;
        }
        segments.push(trimmed);
    }

    if segments.is_empty() {
        return None;
    }

    let mut records = Vec::with_capacity(segments.len());
    let mut cumulative = String::new();
    let mut parent: Option<String> = None;

    for (depth, segment) in segments.into_iter().enumerate() {
        if cumulative.is_empty() {
            cumulative.push_str(segment);
        } else {
            cumulative.push(':');
            cumulative.push_str(segment);
        }

        records.push(PathRecord {
            label: segment.to_string(),
            parent_label: parent.clone(),
            path: cumulative.clone(),
            depth,
        });
        parent = Some(segment.to_string());
    }

    Some(records)
}

/// Parse a batch of raw paths. Invalid paths are counted and retained but
/// never abort the rest of the batch.
pub fn parse_paths<I, S>(paths: I) -> ParsedPaths
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = ParsedPaths::default();

    for raw in paths {
        let raw = raw.as_ref();
        parsed.total_paths += 1;
        match expand_path(raw) {
            Some(records) => {
                parsed.valid_paths += 1;
                parsed.records.extend(records);
            }
            None => parsed.invalid_paths.push(raw.to_string()),
        }
    }

    tracing::debug!(
        total = parsed.total_paths,
        valid = parsed.valid_paths,
        invalid = parsed.invalid_paths.len(),
        "parsed hierarchy path batch"
    );

    parsed
}
