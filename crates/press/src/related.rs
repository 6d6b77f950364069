use crate::content::{Content, ContentId};
use crate::error::{PressError, Result};
use crate::registry::{Processor, Stage};
use crate::site::Site;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;
use tracing::debug;

pub trait RelatedPostsFinder: Send + Sync {
    fn find(&self, contents: &[Content], posts: &[ContentId], post: ContentId, limit: usize)
    -> Vec<ContentId>;
}

/// Cosine similarity over categories, then tags, each weighted by a factor.
#[derive(Debug, Clone, Copy)]
pub struct CosineSimilarityFinder {
    pub categories_factor: f64,
    pub tags_factor: f64,
}

fn cosine<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    shared / ((a.len() as f64).sqrt() * (b.len() as f64).sqrt())
}

impl CosineSimilarityFinder {
    pub fn score(&self, a: &Content, b: &Content) -> f64 {
        let categories_a: HashSet<_> = a.categories.values().collect();
        let categories_b: HashSet<_> = b.categories.values().collect();
        let tags_a: HashSet<_> = a.tags.values().collect();
        let tags_b: HashSet<_> = b.tags.values().collect();

        cosine(&categories_a, &categories_b) * self.categories_factor
            + cosine(&tags_a, &tags_b) * self.tags_factor
    }
}

fn date_distance(a: &Content, b: &Content) -> i64 {
    match (a.date, b.date) {
        (Some(a), Some(b)) => (a - b).num_milliseconds().abs(),
        _ => i64::MAX,
    }
}

/// Ascending rank by `(score, date distance)`: higher score ranks higher, and on equal
/// scores the candidate farther in time ranks lower.
fn compare_ranks(a: (f64, i64), b: (f64, i64)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| b.1.cmp(&a.1))
}

fn compare_candidates(post: &Content, a: (&Content, f64), b: (&Content, f64)) -> Ordering {
    compare_ranks(
        (a.1, date_distance(post, a.0)),
        (b.1, date_distance(post, b.0)),
    )
}

impl RelatedPostsFinder for CosineSimilarityFinder {
    fn find(
        &self,
        contents: &[Content],
        posts: &[ContentId],
        post: ContentId,
        limit: usize,
    ) -> Vec<ContentId> {
        let current = &contents[post.0];
        let mut candidates: Vec<(ContentId, f64)> = posts
            .iter()
            .copied()
            .filter(|id| *id != post)
            .map(|id| (id, self.score(current, &contents[id.0])))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        candidates.sort_by(|a, b| {
            compare_candidates(
                current,
                (&contents[a.0.0], a.1),
                (&contents[b.0.0], b.1),
            )
        });
        candidates.reverse();
        candidates.into_iter().take(limit).map(|(id, _)| id).collect()
    }
}

/// Fills `related_posts` for every post before rendering starts.
#[derive(Debug, Default)]
pub struct RelatedPostsProcessor;

impl Processor for RelatedPostsProcessor {
    fn name(&self) -> &str {
        "related_posts"
    }

    fn order(&self) -> i32 {
        100
    }

    fn process(&self, stage: Stage, site: &mut Site) -> Result<()> {
        if stage != Stage::PreRender {
            return Ok(());
        }

        let settings = site.settings();
        let limit = settings.related_posts;
        if limit == 0 {
            return Ok(());
        }

        let finder = match settings.related_posts_finder.as_str() {
            "cosine" => CosineSimilarityFinder {
                categories_factor: settings.related_posts_categories_factor,
                tags_factor: settings.related_posts_tags_factor,
            },
            other => {
                return Err(PressError::UnknownExtension {
                    kind: "related posts finder",
                    name: other.to_string(),
                });
            }
        };

        let posts = site.posts.clone();
        let contents = &site.contents;
        let related: Vec<(ContentId, Vec<ContentId>)> = site.executor().install(|| {
            posts
                .par_iter()
                .map(|post| (*post, finder.find(contents, &posts, *post, limit)))
                .collect()
        });

        for (post, list) in related {
            debug!(url = %site.contents[post.0].url, related = list.len(), "related posts");
            site.contents[post.0].related_posts = list;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteBuilder;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) {
        let file = dir.join(relative);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }

    fn post(date: &str, tags: &str, categories: &str) -> String {
        format!(
            "---\nlayout: post\ndate: {date}\ntags: [{tags}]\ncategories: [{categories}]\n---\nx\n"
        )
    }

    #[test]
    fn test_cosine() {
        let a: HashSet<u8> = [1, 2].into_iter().collect();
        let b: HashSet<u8> = [2, 3].into_iter().collect();
        assert!((cosine(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(cosine(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn test_near_equal_scores_sort_totally() {
        // Scores closer than 1e-8 still order consistently.
        let mut ranks: Vec<(f64, i64)> = (0..39)
            .map(|step| (0.5 + step as f64 * 0.6e-8, 0))
            .collect();
        for round in 0..200u64 {
            let mut shuffled = ranks.clone();
            let mut seed = round.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            for index in (1..shuffled.len()).rev() {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                shuffled.swap(index, (seed >> 33) as usize % (index + 1));
            }
            shuffled.sort_by(|a, b| compare_ranks(*a, *b));
            assert!(shuffled.windows(2).all(|pair| pair[0].0 <= pair[1].0));
        }

        ranks.push((0.5, 10));
        ranks.sort_by(|a, b| compare_ranks(*a, *b));
        assert_eq!(ranks[0], (0.5, 10));
        assert_eq!(ranks[1], (0.5, 0));
    }

    #[test]
    fn test_related_posts_ranking() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "posts/a.md", &post("2024-01-10", "rust, web", "dev"));
        write(dir.path(), "posts/b.md", &post("2024-01-01", "rust, web", "dev"));
        write(dir.path(), "posts/c.md", &post("2024-01-09", "rust", "dev"));
        write(dir.path(), "posts/d.md", &post("2024-01-14", "rust", "dev"));
        write(dir.path(), "posts/e.md", &post("2024-01-12", "cooking", "life"));

        let mut site = SiteBuilder::new(dir.path()).build().unwrap();
        site.setup().unwrap();
        site.reset().unwrap();
        site.read().unwrap();
        site.generate().unwrap();
        RelatedPostsProcessor.process(Stage::PreRender, &mut site).unwrap();

        let find = |suffix: &str| {
            site.posts
                .iter()
                .copied()
                .find(|id| site.contents[id.0].url == format!("/{suffix}/"))
                .unwrap()
        };
        let related: Vec<String> = site.contents[find("a").0]
            .related_posts
            .iter()
            .map(|id| site.contents[id.0].url.clone())
            .collect();

        // b shares everything; c and d tie on score, c is the closer in time
        assert_eq!(related, vec!["/b/", "/c/", "/d/"]);
        assert!(site.contents[find("e").0].related_posts.is_empty());
    }
}
