//! Global post ordering, the navigation site tree and neighbor links.

use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;

/// Lightweight per-post metadata shared across the whole build: the
/// value stored in the global metadata map and consumed by sidebars,
/// tag pages and neighbor links.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostSummary {
    pub title: String,
    pub link: String,
    pub description: String,
    pub tags: Vec<String>,
    pub date: Option<NaiveDate>,
    pub weight: i64,
    pub pinned: bool,
    pub draft: bool,
    pub version: String,
    pub reading_time: u32,
}

/// One node of the navigation site tree, grouped by URL path segment.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub name: String,
    /// Set on leaves; sections carry only children.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<PostSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

// ============================================================================
// Ordering
// ============================================================================

/// Canonical post order: weight ascending with zero (no weight)
/// sorting last, then date descending, then title ascending.
pub fn sort_posts(posts: &mut [PostSummary]) {
    posts.sort_by(compare_posts);
}

pub fn compare_posts(a: &PostSummary, b: &PostSummary) -> Ordering {
    match (a.weight, b.weight) {
        (0, 0) => {}
        (0, _) => return Ordering::Greater,
        (_, 0) => return Ordering::Less,
        (x, y) => {
            let ord = x.cmp(&y);
            if ord != Ordering::Equal {
                return ord;
            }
        }
    }

    let by_date = match (&a.date, &b.date) {
        (Some(da), Some(db)) => db.cmp(da),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    if by_date != Ordering::Equal {
        return by_date;
    }

    a.title.cmp(&b.title)
}

// ============================================================================
// Site tree
// ============================================================================

/// Build the navigation hierarchy for one version from sorted posts.
///
/// Segments come from the link path (base URL stripped). Within one
/// node, leaf children keep the canonical post order and section
/// children follow, sorted by name.
pub fn build_site_tree(posts: &[PostSummary], base_url: &str) -> Vec<TreeNode> {
    let mut root: Vec<TreeNode> = Vec::new();
    for post in posts {
        let path = post
            .link
            .strip_prefix(base_url)
            .unwrap_or(&post.link)
            .trim_matches('/');
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            continue;
        }
        insert_post(&mut root, &segments, post);
    }
    order_children(&mut root);
    root
}

fn insert_post(nodes: &mut Vec<TreeNode>, segments: &[&str], post: &PostSummary) {
    let (head, rest) = segments.split_first().expect("non-empty segments");

    if rest.is_empty() {
        let name = if post.title.is_empty() {
            head.trim_end_matches(".html").to_string()
        } else {
            post.title.clone()
        };
        nodes.push(TreeNode {
            name,
            post: Some(post.clone()),
            children: Vec::new(),
        });
        return;
    }

    let section = match nodes
        .iter_mut()
        .position(|n| n.post.is_none() && n.name == *head)
    {
        Some(i) => &mut nodes[i],
        None => {
            nodes.push(TreeNode {
                name: head.to_string(),
                post: None,
                children: Vec::new(),
            });
            nodes.last_mut().expect("just pushed")
        }
    };
    insert_post(&mut section.children, rest, post);
}

fn order_children(nodes: &mut Vec<TreeNode>) {
    nodes.sort_by(|a, b| match (&a.post, &b.post) {
        (Some(pa), Some(pb)) => compare_posts(pa, pb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
    for node in nodes {
        order_children(&mut node.children);
    }
}

// ============================================================================
// Neighbors
// ============================================================================

/// Previous/next posts around `link` in the version's sorted list.
/// Ends yield `None`; there is no wrap-around.
pub fn find_prev_next(
    link: &str,
    sorted: &[PostSummary],
) -> (Option<PostSummary>, Option<PostSummary>) {
    let Some(pos) = sorted.iter().position(|p| p.link == link) else {
        return (None, None);
    };
    let prev = pos.checked_sub(1).map(|i| sorted[i].clone());
    let next = sorted.get(pos + 1).cloned();
    (prev, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(title: &str, link: &str, weight: i64, date: Option<&str>) -> PostSummary {
        PostSummary {
            title: title.into(),
            link: link.into(),
            weight,
            date: date.map(|d| d.parse().unwrap()),
            ..PostSummary::default()
        }
    }

    #[test]
    fn test_sort_weighted_before_unweighted() {
        let mut posts = vec![
            post("No Weight", "/a.html", 0, Some("2026-01-01")),
            post("Second", "/b.html", 2, None),
            post("First", "/c.html", 1, None),
        ];
        sort_posts(&mut posts);
        let titles: Vec<_> = posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second", "No Weight"]);
    }

    #[test]
    fn test_sort_date_descending_then_title() {
        let mut posts = vec![
            post("Older", "/a.html", 0, Some("2026-01-01")),
            post("Newer", "/b.html", 0, Some("2026-02-01")),
            post("B Same Day", "/c.html", 0, Some("2026-02-01")),
            post("Undated", "/d.html", 0, None),
        ];
        sort_posts(&mut posts);
        let titles: Vec<_> = posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["B Same Day", "Newer", "Older", "Undated"]);
    }

    #[test]
    fn test_site_tree_grouping() {
        let mut posts = vec![
            post("Intro", "/guide/intro.html", 1, None),
            post("Setup", "/guide/setup.html", 2, None),
            post("About", "/about.html", 0, None),
        ];
        sort_posts(&mut posts);

        let tree = build_site_tree(&posts, "");
        assert_eq!(tree.len(), 2);

        // Leaf before section
        assert_eq!(tree[0].name, "About");
        assert!(tree[0].post.is_some());

        let guide = &tree[1];
        assert_eq!(guide.name, "guide");
        assert!(guide.post.is_none());
        assert_eq!(guide.children.len(), 2);
        assert_eq!(guide.children[0].name, "Intro");
        assert_eq!(guide.children[1].name, "Setup");
    }

    #[test]
    fn test_site_tree_strips_base_url() {
        let posts = vec![post(
            "Post",
            "https://example.com/posts/hello.html",
            0,
            None,
        )];
        let tree = build_site_tree(&posts, "https://example.com");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "posts");
        assert_eq!(tree[0].children[0].name, "Post");
    }

    #[test]
    fn test_find_prev_next_middle() {
        let posts = vec![
            post("A", "/a.html", 1, None),
            post("B", "/b.html", 2, None),
            post("C", "/c.html", 3, None),
        ];
        let (prev, next) = find_prev_next("/b.html", &posts);
        assert_eq!(prev.unwrap().link, "/a.html");
        assert_eq!(next.unwrap().link, "/c.html");
    }

    #[test]
    fn test_find_prev_next_no_wrap() {
        let posts = vec![post("A", "/a.html", 1, None), post("B", "/b.html", 2, None)];

        let (prev, next) = find_prev_next("/a.html", &posts);
        assert!(prev.is_none());
        assert_eq!(next.unwrap().link, "/b.html");

        let (prev, next) = find_prev_next("/b.html", &posts);
        assert_eq!(prev.unwrap().link, "/a.html");
        assert!(next.is_none());
    }

    #[test]
    fn test_find_prev_next_missing_link() {
        let posts = vec![post("A", "/a.html", 1, None)];
        let (prev, next) = find_prev_next("/zzz.html", &posts);
        assert!(prev.is_none());
        assert!(next.is_none());
    }
}
