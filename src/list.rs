use crate::model::ListEntry;

/// Highlight + substring filter over a page's entries.
#[derive(Debug, Clone, Default)]
pub struct SelectableList {
    entries: Vec<ListEntry>,
    visible: Vec<usize>,
    filter: String,
    highlighted: usize,
}

impl SelectableList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entries, keeping the filter. The highlight survives when
    /// the filtered length does not change.
    pub fn set_entries(&mut self, entries: Vec<ListEntry>) {
        self.entries = entries;
        self.apply_filter();
    }

    /// Highlight the first marked entry, if any.
    pub fn highlight_marked(&mut self) {
        if let Some(position) = self
            .visible
            .iter()
            .position(|index| self.entries[*index].marked)
        {
            self.highlighted = position;
        }
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
        self.apply_filter();
    }

    pub fn clear_filter(&mut self) {
        self.set_filter(String::new());
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn move_down(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        self.highlighted = (self.highlighted + 1) % self.visible.len();
    }

    pub fn move_up(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        self.highlighted = self
            .highlighted
            .checked_sub(1)
            .unwrap_or(self.visible.len() - 1);
    }

    pub fn highlighted(&self) -> usize {
        self.highlighted
    }

    pub fn selected(&self) -> Option<&ListEntry> {
        self.visible
            .get(self.highlighted)
            .map(|index| &self.entries[*index])
    }

    pub fn visible_entries(&self) -> impl Iterator<Item = &ListEntry> {
        self.visible.iter().map(|index| &self.entries[*index])
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    fn apply_filter(&mut self) {
        let visible = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.matches_filter(&self.filter))
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        if visible.len() != self.visible.len() {
            self.highlighted = 0;
        }
        self.visible = visible;
        self.highlighted = self.highlighted.min(self.visible.len().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::SelectableList;
    use crate::model::ListEntry;

    fn entries(labels: &[&str]) -> Vec<ListEntry> {
        labels
            .iter()
            .map(|label| ListEntry {
                label: label.to_string(),
                cells: vec![label.to_string()],
                section: 0,
                marked: false,
                target: None,
            })
            .collect()
    }

    fn selected_label(list: &SelectableList) -> Option<&str> {
        list.selected().map(|entry| entry.label.as_str())
    }

    #[test]
    fn movement_wraps_both_ways() {
        let mut list = SelectableList::new();
        list.set_entries(entries(&["default", "kube-system", "istio-system"]));

        list.move_up();
        assert_eq!(selected_label(&list), Some("istio-system"));
        list.move_down();
        assert_eq!(selected_label(&list), Some("default"));
        list.move_down();
        list.move_down();
        list.move_down();
        assert_eq!(selected_label(&list), Some("default"));
    }

    #[test]
    fn filtering_resets_highlight_when_length_changes() {
        let mut list = SelectableList::new();
        list.set_entries(entries(&["default", "kube-system", "istio-system"]));
        list.move_down();
        list.move_down();

        list.set_filter("system");
        assert_eq!(list.len(), 2);
        assert_eq!(list.highlighted(), 0);
        assert_eq!(selected_label(&list), Some("kube-system"));

        list.move_down();
        list.set_filter("SYSTEM");
        assert_eq!(list.highlighted(), 1);

        list.clear_filter();
        assert_eq!(list.len(), 3);
        assert_eq!(list.highlighted(), 0);
    }

    #[test]
    fn empty_list_has_no_selection() {
        let mut list = SelectableList::new();
        list.move_down();
        list.move_up();
        assert!(list.is_empty());
        assert_eq!(list.selected(), None);

        list.set_entries(entries(&["default"]));
        list.set_filter("nothing-matches");
        assert_eq!(list.selected(), None);
    }

    #[test]
    fn marked_entry_gets_highlighted() {
        let mut list = SelectableList::new();
        let mut items = entries(&["a", "b", "c"]);
        items[2].marked = true;
        list.set_entries(items);
        list.highlight_marked();
        assert_eq!(selected_label(&list), Some("c"));
    }
}
