use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::article::RankedArticle;
use crate::vecmath;

/// Cosine similarity above which two articles count as near-duplicates.
pub const GROUPING_THRESHOLD: f32 = 0.85;

/// A representative article with its absorbed near-duplicates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArticleGroup {
    pub article: RankedArticle,
    pub related: Vec<RankedArticle>,
}

/// Greedy single-pass grouping in input order.
///
/// The first unvisited article becomes a representative and absorbs every
/// later unvisited article whose cosine similarity TO THE REPRESENTATIVE is
/// at least `threshold`. Membership is deliberately non-transitive: two
/// absorbed articles may be far from each other, and an article close to an
/// absorbed member but far from the representative starts its own group.
/// Articles without an embedding (or with a zero one) are singletons.
pub fn group_by_similarity(
    articles: &[RankedArticle],
    embeddings: &HashMap<String, Vec<f32>>,
    threshold: f32,
) -> Vec<ArticleGroup> {
    let mut grouped: Vec<ArticleGroup> = Vec::new();
    let mut visited = vec![false; articles.len()];

    for i in 0..articles.len() {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let mut group = ArticleGroup {
            article: articles[i].clone(),
            related: Vec::new(),
        };

        let rep = embeddings.get(&articles[i].id);
        let Some(rep) = rep.filter(|e| vecmath::norm(e) > 0.0) else {
            grouped.push(group);
            continue;
        };

        for j in (i + 1)..articles.len() {
            if visited[j] {
                continue;
            }
            let Some(other) = embeddings.get(&articles[j].id) else {
                continue;
            };
            if vecmath::norm(other) == 0.0 {
                continue;
            }
            if vecmath::cosine_similarity(rep, other) >= threshold {
                group.related.push(articles[j].clone());
                visited[j] = true;
            }
        }

        grouped.push(group);
    }

    grouped
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    fn article(id: &str) -> RankedArticle {
        RankedArticle {
            id: id.to_string(),
            title: format!("記事 {id}"),
            link: format!("https://news.example.com/{id}"),
            summary: String::new(),
            published: String::new(),
            category: String::new(),
            image_url: String::new(),
            similarity: 0.0,
            reason: None,
        }
    }

    fn unit(angle_deg: f32) -> Vec<f32> {
        let rad = angle_deg.to_radians();
        vec![rad.cos(), rad.sin()]
    }

    /// Five articles on the unit circle. a1↔a2 and a2↔a3 are within the
    /// 0.85 threshold, a1↔a3 is not (cos 50° ≈ 0.64); a4↔a5 are close and
    /// far from everything else.
    fn fixture() -> (Vec<RankedArticle>, HashMap<String, Vec<f32>>) {
        let articles = vec![
            article("a1"),
            article("a2"),
            article("a3"),
            article("a4"),
            article("a5"),
        ];
        let embeddings = HashMap::from([
            ("a1".to_string(), unit(25.0)),
            ("a2".to_string(), unit(0.0)),
            ("a3".to_string(), unit(-25.0)),
            ("a4".to_string(), unit(120.0)),
            ("a5".to_string(), unit(140.0)),
        ]);
        (articles, embeddings)
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_by_similarity(&[], &HashMap::new(), GROUPING_THRESHOLD).is_empty());
    }

    #[test]
    fn absorption_is_relative_to_the_representative_only() {
        let (articles, embeddings) = fixture();
        let groups = group_by_similarity(&articles, &embeddings, GROUPING_THRESHOLD);

        // a1 leads and absorbs a2; a3 is close to a2 but not to the
        // representative a1, so it starts its own group.
        let ids: Vec<(&str, Vec<&str>)> = groups
            .iter()
            .map(|g| {
                (
                    g.article.id.as_str(),
                    g.related.iter().map(|r| r.id.as_str()).collect(),
                )
            })
            .collect();
        assert_eq!(
            ids,
            vec![
                ("a1", vec!["a2"]),
                ("a3", vec![]),
                ("a4", vec!["a5"]),
            ]
        );
    }

    #[test]
    fn input_order_decides_the_partition() {
        // Same articles led by a2: now both a1 and a3 sit within the
        // threshold of the representative, and a3 ends up grouped with a1
        // even though the two are far apart from each other.
        let (mut articles, embeddings) = fixture();
        articles.swap(0, 1);
        let groups = group_by_similarity(&articles, &embeddings, GROUPING_THRESHOLD);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].article.id, "a2");
        let related: Vec<&str> = groups[0].related.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(related, vec!["a1", "a3"]);
        assert_eq!(groups[1].article.id, "a4");
    }

    #[test]
    fn output_is_a_partition_of_the_input() {
        let (articles, embeddings) = fixture();
        let groups = group_by_similarity(&articles, &embeddings, GROUPING_THRESHOLD);

        let mut seen = HashSet::new();
        for g in &groups {
            assert!(seen.insert(g.article.id.clone()));
            for r in &g.related {
                assert!(seen.insert(r.id.clone()));
            }
        }
        assert_eq!(seen.len(), articles.len());
    }

    #[test]
    fn every_member_is_within_threshold_of_its_representative() {
        let (articles, embeddings) = fixture();
        let groups = group_by_similarity(&articles, &embeddings, GROUPING_THRESHOLD);

        for g in &groups {
            let rep = &embeddings[&g.article.id];
            for r in &g.related {
                let sim = vecmath::cosine_similarity(rep, &embeddings[&r.id]);
                assert!(sim >= GROUPING_THRESHOLD);
            }
        }
    }

    #[test]
    fn missing_embeddings_form_singletons() {
        let articles = vec![article("a1"), article("a2")];
        let embeddings = HashMap::from([("a2".to_string(), unit(0.0))]);
        let groups = group_by_similarity(&articles, &embeddings, GROUPING_THRESHOLD);

        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.related.is_empty()));
    }

    #[test]
    fn representatives_keep_input_order() {
        let (articles, embeddings) = fixture();
        let groups = group_by_similarity(&articles, &embeddings, GROUPING_THRESHOLD);
        let reps: Vec<&str> = groups.iter().map(|g| g.article.id.as_str()).collect();
        assert_eq!(reps, vec!["a1", "a3", "a4"]);
    }
}
