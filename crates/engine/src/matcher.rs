//! Best-candidate selection over storefront search results.
//!
//! Scoring is a token-coverage ratio: the share of query tokens found in a
//! card title. Both sides are lowercased and accent-folded first, so
//! `feijao` matches `Feijão`.

/// One search result card as read from the page.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: Option<String>,
    /// Unit price, `None` when the card's price text did not parse.
    pub price: Option<f64>,
}

impl Candidate {
    pub fn new(title: Option<&str>, price: Option<f64>) -> Self {
        Self {
            title: title.map(|t| t.to_string()),
            price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    /// Position of the winning card in result order.
    pub index: usize,
    pub price: f64,
    pub score: f64,
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Lowercase and strip Latin diacritics.
pub fn fold(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).map(fold_char).collect()
}

/// Lowercase alphanumeric tokens longer than one character.
pub fn tokenize(query: &str) -> Vec<String> {
    fold(query)
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

/// Fraction of `tokens` contained in `title`; 0 without tokens or title.
pub fn score(tokens: &[String], title: Option<&str>) -> f64 {
    let title = match title.map(str::trim) {
        Some(t) if !t.is_empty() => fold(t),
        _ => return 0.0,
    };
    if tokens.is_empty() {
        return 0.0;
    }
    let hits = tokens.iter().filter(|t| title.contains(t.as_str())).count();
    hits as f64 / tokens.len() as f64
}

#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    pub max_candidates: usize,
    /// Stop after the first card when it already scores at least this.
    pub early_stop_score: f64,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            max_candidates: 12,
            early_stop_score: 0.6,
        }
    }
}

impl Matcher {
    pub fn new(max_candidates: usize, early_stop_score: f64) -> Self {
        Self {
            max_candidates,
            early_stop_score,
        }
    }

    /// Highest-scoring card with a price, first seen wins ties. Cards are
    /// pulled lazily, so an early stop leaves the rest unread.
    pub fn pick<I>(&self, query: &str, cards: I) -> Option<MatchOutcome>
    where
        I: IntoIterator<Item = Candidate>,
    {
        let tokens = tokenize(query);
        let mut best: Option<MatchOutcome> = None;

        for (index, card) in cards.into_iter().take(self.max_candidates).enumerate() {
            let Some(price) = card.price else {
                continue;
            };
            let score = score(&tokens, card.title.as_deref());
            if best.map_or(true, |b| score > b.score) {
                best = Some(MatchOutcome { index, price, score });
            }
            if index == 0 && score >= self.early_stop_score {
                break;
            }
        }
        best
    }

    /// First card with a price, regardless of score.
    pub fn fallback<I>(&self, cards: I) -> Option<MatchOutcome>
    where
        I: IntoIterator<Item = Candidate>,
    {
        cards
            .into_iter()
            .take(self.max_candidates)
            .enumerate()
            .find_map(|(index, card)| {
                card.price.map(|price| MatchOutcome {
                    index,
                    price,
                    score: 0.0,
                })
            })
    }
}
