use std::collections::BTreeMap;

use crate::rng::{hash_str, Rng};
use crate::types::Hotspot;

/// Sorted, deduplicated page keys with `current` always present.
pub fn normalize_pages(page_keys: &[String], current: &str) -> Vec<String> {
    let mut pages: Vec<String> = page_keys.to_vec();
    pages.push(current.to_string());
    pages.sort();
    pages.dedup();
    pages
}

pub fn normalize_target_ids(target_ids: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = target_ids.to_vec();
    ids.sort();
    ids.dedup();
    ids
}

pub fn compute_salt(pages: &[String], target_ids: &[String]) -> u32 {
    let mut material = pages.join(",");
    material.push_str("::");
    material.push_str(&target_ids.join(","));
    hash_str(&material)
}

/// Splits `shuffled` across `pages` in page order. With fewer targets than pages
/// every page still gets one, wrapping around the list.
pub fn partition_targets(shuffled: &[String], pages: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    let total = shuffled.len();
    if pages.is_empty() {
        return out;
    }
    if total == 0 {
        for page in pages {
            out.insert(page.clone(), Vec::new());
        }
        return out;
    }
    if total < pages.len() {
        for (idx, page) in pages.iter().enumerate() {
            out.insert(page.clone(), vec![shuffled[idx % total].clone()]);
        }
        return out;
    }

    let base = total / pages.len();
    let remainder = total % pages.len();
    let mut cursor = 0;
    for (idx, page) in pages.iter().enumerate() {
        let take = base + usize::from(idx < remainder);
        out.insert(page.clone(), shuffled[cursor..cursor + take].to_vec());
        cursor += take;
    }
    out
}

/// Site-wide split of targets over pages. Any change to the page set or the
/// target set changes the salt and reshuffles everything.
#[derive(Clone, Debug, PartialEq)]
pub struct SiteDistribution {
    pub salt: u32,
    pub pages: Vec<String>,
    pub by_page: BTreeMap<String, Vec<String>>,
}

impl SiteDistribution {
    pub fn build(target_ids: &[String], page_keys: &[String], current_page: &str) -> Self {
        let pages = normalize_pages(page_keys, current_page);
        let mut ids = normalize_target_ids(target_ids);
        let salt = compute_salt(&pages, &ids);
        Rng::from_parts(&["site", &salt.to_string()]).shuffle(&mut ids);
        let by_page = partition_targets(&ids, &pages);
        Self {
            salt,
            pages,
            by_page,
        }
    }

    pub fn targets_for(&self, page_key: &str) -> &[String] {
        self.by_page
            .get(page_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Hotspot map for one page, keyed by cell index.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub page_key: String,
    pub salt: u32,
    hotspots: BTreeMap<usize, Hotspot>,
}

impl Assignment {
    pub fn empty(page_key: &str, salt: u32) -> Self {
        Self {
            page_key: page_key.to_string(),
            salt,
            hotspots: BTreeMap::new(),
        }
    }

    pub fn build(
        distribution: &SiteDistribution,
        page_key: &str,
        allowed_cells: &[usize],
        cell_limit: usize,
    ) -> Self {
        let salt = distribution.salt;
        let salt_text = salt.to_string();

        let mut cells = allowed_cells.to_vec();
        cells.sort_unstable();
        cells.dedup();
        Rng::from_parts(&["cells", page_key, &salt_text]).shuffle(&mut cells);

        let mut sublist = distribution.targets_for(page_key).to_vec();
        Rng::from_parts(&["targets", page_key, &salt_text]).shuffle(&mut sublist);

        let mut hotspots = BTreeMap::new();
        for (cell, target_id) in cells.into_iter().zip(sublist).take(cell_limit) {
            let cell_text = cell.to_string();
            let mut rng = Rng::from_parts(&["offset", page_key, &salt_text, &cell_text, &target_id]);
            let offset_x = rng.next_f64();
            let offset_y = rng.next_f64();
            hotspots.insert(
                cell,
                Hotspot {
                    cell,
                    target_id,
                    offset_x,
                    offset_y,
                },
            );
        }

        Self {
            page_key: page_key.to_string(),
            salt,
            hotspots,
        }
    }

    pub fn hotspot(&self, cell: usize) -> Option<&Hotspot> {
        self.hotspots.get(&cell)
    }

    pub fn hotspots(&self) -> impl Iterator<Item = &Hotspot> {
        self.hotspots.values()
    }

    pub fn len(&self) -> usize {
        self.hotspots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotspots.is_empty()
    }
}
