//! Enumeration options: sorting and pagination applied after fetching.

use bucketfs_storage::ObjectRecord;
use bucketfs_storage::path::basename;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    /// Backend key order.
    #[default]
    None,
    Name,
    /// Modification timestamp. Folders carry none and keep name order.
    Modified,
}

/// Options for `list_files_in_folder` and `list_folders_in_folder`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Entries to skip.
    pub start: usize,
    /// Maximum entries to return; `0` means unbounded.
    pub count: usize,
    /// Include every descendant folder, not just direct children.
    pub recursive: bool,
    pub sort: SortField,
    pub reverse: bool,
}
impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, start: usize, count: usize) -> Self {
        self.start = start;
        self.count = count;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn sorted(mut self, sort: SortField, reverse: bool) -> Self {
        self.sort = sort;
        self.reverse = reverse;
        self
    }

    /// Slice `items` to the requested page.
    pub(crate) fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let items = items.into_iter().skip(self.start);
        match self.count {
            0 => items.collect(),
            count => items.take(count).collect(),
        }
    }

    fn finish(&self, ordering: Ordering) -> Ordering {
        match self.reverse {
            true => ordering.reverse(),
            false => ordering,
        }
    }

    /// Sort file records, then return their identifiers for the page.
    pub(crate) fn apply_to_files(&self, mut records: Vec<ObjectRecord>) -> Vec<String> {
        records.sort_by(|a, b| {
            let ordering = match self.sort {
                SortField::None => a.key.cmp(&b.key),
                SortField::Name => basename(&a.key).cmp(basename(&b.key)).then_with(|| a.key.cmp(&b.key)),
                SortField::Modified => a.updated.cmp(&b.updated).then_with(|| a.key.cmp(&b.key)),
            };
            self.finish(ordering)
        });
        let identifiers = records
            .into_iter()
            .map(|record| bucketfs_storage::path::compute_file_identifier(&record.key))
            .collect();
        self.paginate(identifiers)
    }

    /// Sort folder identifiers, then return the page.
    pub(crate) fn apply_to_folders(&self, mut folders: Vec<String>) -> Vec<String> {
        folders.sort_by(|a, b| {
            let ordering = match self.sort {
                SortField::None => a.cmp(b),
                SortField::Name | SortField::Modified => basename(a).cmp(basename(b)).then_with(|| a.cmp(b)),
            };
            self.finish(ordering)
        });
        self.paginate(folders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    fn records() -> Vec<ObjectRecord> {
        vec![
            ObjectRecord::new("b/zebra.jpg", "media", 1, datetime!(2024-01-01 00:00 UTC)),
            ObjectRecord::new("a/apple.jpg", "media", 1, datetime!(2024-03-01 00:00 UTC)),
            ObjectRecord::new("c/mango.jpg", "media", 1, datetime!(2024-02-01 00:00 UTC)),
        ]
    }

    #[rstest]
    #[case(SortField::None, false, &["/a/apple.jpg", "/b/zebra.jpg", "/c/mango.jpg"])]
    #[case(SortField::Name, false, &["/a/apple.jpg", "/c/mango.jpg", "/b/zebra.jpg"])]
    #[case(SortField::Name, true, &["/b/zebra.jpg", "/c/mango.jpg", "/a/apple.jpg"])]
    #[case(SortField::Modified, false, &["/b/zebra.jpg", "/c/mango.jpg", "/a/apple.jpg"])]
    #[case(SortField::Modified, true, &["/a/apple.jpg", "/c/mango.jpg", "/b/zebra.jpg"])]
    fn test_file_sorting(#[case] sort: SortField, #[case] reverse: bool, #[case] expected: &[&str]) {
        let options = ListOptions::new().sorted(sort, reverse);
        assert_eq!(options.apply_to_files(records()), expected);
    }

    #[rstest]
    #[case(0, 0, &[1, 2, 3, 4, 5])]
    #[case(2, 0, &[3, 4, 5])]
    #[case(1, 2, &[2, 3])]
    #[case(4, 10, &[5])]
    #[case(9, 2, &[])]
    fn test_paginate(#[case] start: usize, #[case] count: usize, #[case] expected: &[u8]) {
        let options = ListOptions::new().page(start, count);
        assert_eq!(options.paginate(vec![1u8, 2, 3, 4, 5]), expected);
    }

    #[test]
    fn test_sort_happens_before_pagination() {
        let options = ListOptions::new().sorted(SortField::Name, true).page(0, 1);
        assert_eq!(options.apply_to_files(records()), vec!["/b/zebra.jpg"]);
    }

    #[test]
    fn test_folder_sorting_by_name() {
        let folders = vec!["/z/archive/".to_string(), "/a/videos/".to_string(), "/m/photos/".to_string()];
        let options = ListOptions::new().sorted(SortField::Modified, false);
        assert_eq!(options.apply_to_folders(folders), vec!["/z/archive/", "/m/photos/", "/a/videos/"]);
    }
}
