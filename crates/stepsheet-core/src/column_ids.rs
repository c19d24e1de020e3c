//! Per-sheet mapping between stable column ids and current headers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use stepsheet_engine::engine::ColumnId;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct SheetIds {
    /// Ids in column order.
    order: Vec<ColumnId>,
    headers: BTreeMap<ColumnId, String>,
}

impl SheetIds {
    fn contains_header(&self, header: &str) -> bool {
        self.headers.values().any(|h| h == header)
    }
}

/// Bijection, per sheet, between [`ColumnId`]s and headers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnIdMap {
    sheets: Vec<SheetIds>,
    next_id: u64,
    legacy: bool,
}

impl ColumnIdMap {
    pub fn new(legacy: bool) -> ColumnIdMap {
        ColumnIdMap { legacy, ..ColumnIdMap::default() }
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    pub fn num_sheets(&self) -> usize {
        self.sheets.len()
    }

    /// A new id for `header`. Legacy ids are derived from the header and
    /// suffixed until `taken` rejects none of them.
    fn fresh_id(&mut self, header: &str, taken: impl Fn(&ColumnId) -> bool) -> ColumnId {
        if self.legacy {
            let base = ColumnId::legacy(header);
            if !taken(&base) {
                return base;
            }
            let mut n = 1;
            loop {
                let candidate = ColumnId::new(format!("{}_{}", base, n));
                if !taken(&candidate) {
                    return candidate;
                }
                n += 1;
            }
        }
        let id = ColumnId::sequential(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register a table's headers, appending a sheet or replacing the one at
    /// `target`. On replacement, headers that already existed keep their ids.
    pub fn add_table(&mut self, headers: &[String], target: Option<usize>) -> Vec<ColumnId> {
        let previous = target.and_then(|t| self.sheets.get(t)).cloned().unwrap_or_default();
        // ids carried over from the replaced sheet, wherever their header sits
        let kept: BTreeSet<ColumnId> = previous
            .headers
            .iter()
            .filter(|(_, h)| headers.contains(*h))
            .map(|(id, _)| id.clone())
            .collect();
        let mut sheet = SheetIds::default();
        for header in headers {
            let reused = previous
                .headers
                .iter()
                .find(|(_, h)| *h == header)
                .map(|(id, _)| id.clone());
            let id = match reused {
                Some(id) => id,
                None => self.fresh_id(header, |id| kept.contains(id) || sheet.headers.contains_key(id)),
            };
            sheet.order.push(id.clone());
            sheet.headers.insert(id, header.clone());
        }
        let ids = sheet.order.clone();
        match target {
            Some(t) if t < self.sheets.len() => self.sheets[t] = sheet,
            _ => self.sheets.push(sheet),
        }
        ids
    }

    /// Add one column at `position` in a sheet's column order.
    pub fn insert(&mut self, sheet: usize, position: usize, header: &str) -> Option<ColumnId> {
        let existing = self.sheets.get(sheet)?.clone();
        let id = self.fresh_id(header, |id| existing.headers.contains_key(id));
        let ids = self.sheets.get_mut(sheet)?;
        let position = position.min(ids.order.len());
        ids.order.insert(position, id.clone());
        ids.headers.insert(id.clone(), header.to_string());
        Some(id)
    }

    pub fn remove(&mut self, sheet: usize, id: &ColumnId) -> Option<String> {
        let ids = self.sheets.get_mut(sheet)?;
        ids.order.retain(|i| i != id);
        ids.headers.remove(id)
    }

    pub fn set_header(&mut self, sheet: usize, id: &ColumnId, header: &str) -> bool {
        match self.sheets.get_mut(sheet).and_then(|s| s.headers.get_mut(id)) {
            Some(h) => {
                *h = header.to_string();
                true
            }
            None => false,
        }
    }

    pub fn id_for(&self, sheet: usize, header: &str) -> Option<&ColumnId> {
        self.sheets
            .get(sheet)?
            .headers
            .iter()
            .find(|(_, h)| *h == header)
            .map(|(id, _)| id)
    }

    pub fn header_for(&self, sheet: usize, id: &ColumnId) -> Option<&str> {
        self.sheets.get(sheet)?.headers.get(id).map(String::as_str)
    }

    pub fn contains_header(&self, sheet: usize, header: &str) -> bool {
        self.sheets.get(sheet).is_some_and(|s| s.contains_header(header))
    }

    /// Headers for `ids`, or `None` if any id is unknown.
    pub fn headers_for<'a>(&self, sheet: usize, ids: impl IntoIterator<Item = &'a ColumnId>) -> Option<Vec<String>> {
        let sheet = self.sheets.get(sheet)?;
        ids.into_iter().map(|id| sheet.headers.get(id).cloned()).collect()
    }

    /// Ids of a sheet in column order.
    pub fn ids(&self, sheet: usize) -> &[ColumnId] {
        self.sheets.get(sheet).map(|s| s.order.as_slice()).unwrap_or(&[])
    }

    /// Headers of a sheet in column order.
    pub fn headers(&self, sheet: usize) -> Vec<String> {
        self.sheets
            .get(sheet)
            .map(|s| s.order.iter().filter_map(|id| s.headers.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// A copy with every id rewritten by `transform(sheet, id, header)`.
    /// Fails without side effects if two columns of one sheet collide.
    pub fn remap(
        &self,
        mut transform: impl FnMut(usize, &ColumnId, &str) -> ColumnId,
        legacy: bool,
    ) -> Result<(ColumnIdMap, Vec<BTreeMap<ColumnId, ColumnId>>), String> {
        let mut sheets = Vec::with_capacity(self.sheets.len());
        let mut mappings = Vec::with_capacity(self.sheets.len());
        for (index, sheet) in self.sheets.iter().enumerate() {
            let mut mapping = BTreeMap::new();
            let mut seen = BTreeSet::new();
            let mut remapped = SheetIds::default();
            for id in &sheet.order {
                let header = sheet.headers.get(id).ok_or_else(|| format!("id {} has no header", id))?;
                let new_id = transform(index, id, header);
                if !seen.insert(new_id.clone()) {
                    return Err(format!(
                        "columns in dataframe {} collide on id {}",
                        index, new_id
                    ));
                }
                remapped.order.push(new_id.clone());
                remapped.headers.insert(new_id.clone(), header.clone());
                mapping.insert(id.clone(), new_id);
            }
            sheets.push(remapped);
            mappings.push(mapping);
        }
        Ok((
            ColumnIdMap { sheets, next_id: self.next_id, legacy },
            mappings,
        ))
    }

    /// Check the map is a bijection whose order covers exactly its ids.
    pub(crate) fn check_sheet(&self, sheet: usize) -> Result<(), String> {
        let ids = self.sheets.get(sheet).ok_or_else(|| format!("no ids for dataframe {}", sheet))?;
        if ids.order.len() != ids.headers.len() || ids.order.iter().any(|id| !ids.headers.contains_key(id)) {
            return Err(format!("column order and ids disagree in dataframe {}", sheet));
        }
        let unique: BTreeSet<&String> = ids.headers.values().collect();
        if unique.len() != ids.headers.len() {
            return Err(format!("duplicate headers in dataframe {}", sheet));
        }
        Ok(())
    }
}
