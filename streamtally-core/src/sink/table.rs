use super::*;

/// An immutable result table, as produced by one sink write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    batch_id: Option<BatchId>,
    rows: BTreeMap<AggregationKey, Accumulator>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last batch applied to this table.
    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &AggregationKey) -> Option<&Accumulator> {
        self.rows.get(key)
    }

    /// Rows in key order.
    pub fn rows(&self) -> Vec<EmittedRow> {
        self.rows
            .iter()
            .map(|(k, v)| EmittedRow::new(k.clone(), v.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AggregationKey, &Accumulator)> {
        self.rows.iter()
    }

    /// The table after applying one batch of `rows` in `mode`.
    pub fn apply(&self, batch_id: BatchId, rows: &[EmittedRow], mode: OutputMode) -> Self {
        let mut next = match mode {
            OutputMode::Complete => BTreeMap::new(),
            OutputMode::Update | OutputMode::Append => self.rows.clone(),
        };
        for row in rows {
            next.insert(row.key.clone(), row.value.clone());
        }
        Self {
            batch_id: Some(batch_id),
            rows: next,
        }
    }

    /// Render as a fixed-width text table.
    pub fn render(&self) -> String {
        render_rows(self.rows.iter())
    }
}

/// Render `(key, value)` pairs as a text table with a header row.
pub fn render_rows<'a>(
    rows: impl Iterator<Item = (&'a AggregationKey, &'a Accumulator)>,
) -> String {
    let header = [
        "key".to_string(),
        "window_start".to_string(),
        "window_end".to_string(),
        "value".to_string(),
    ];
    let mut lines: Vec<[String; 4]> = vec![header];
    for (key, value) in rows {
        lines.push([
            key.key.clone(),
            format_event_time(key.window.start),
            format_event_time(key.window.end),
            value.to_string(),
        ]);
    }

    let mut widths = [0usize; 4];
    for line in &lines {
        for (width, cell) in widths.iter_mut().zip(line.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }
    let border: String = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let border = format!("+{border}+");

    let mut out = String::new();
    out.push_str(&border);
    out.push('\n');
    for (i, line) in lines.iter().enumerate() {
        let cells: Vec<String> = line
            .iter()
            .zip(widths.iter())
            .map(|(cell, &w)| format!(" {cell:<w$} "))
            .collect();
        out.push('|');
        out.push_str(&cells.join("|"));
        out.push_str("|\n");
        if i == 0 {
            out.push_str(&border);
            out.push('\n');
        }
    }
    out.push_str(&border);
    out.push('\n');
    out
}
