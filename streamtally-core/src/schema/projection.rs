use super::*;

/// Why a decoded row did not become an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionSkip {
    NullTime,
    NullKey,
}

/// Selects the time, group-by and optional measure columns of a row.
///
/// Column positions are resolved once, at query start, so projecting a row
/// is a few index lookups.
#[derive(Debug, Clone)]
pub struct EventProjection {
    time_idx: usize,
    key_idx: usize,
    measure_idx: Option<usize>,
}

impl EventProjection {
    /// Resolve and type-check the projected columns against `schema`.
    pub fn new(
        schema: &Schema,
        time_field: &str,
        group_by: &str,
        measure_field: Option<&str>,
    ) -> QueryResult<Self> {
        let time_idx = schema
            .index_of(time_field)
            .ok_or_else(|| QueryError::config(format!("time field '{time_field}' not in schema")))?;
        let time_type = schema.fields()[time_idx].data_type;
        if time_type != DataType::Timestamp {
            return Err(QueryError::config(format!(
                "time field '{time_field}' must be a timestamp, found {time_type}"
            )));
        }

        let key_idx = schema
            .index_of(group_by)
            .ok_or_else(|| QueryError::config(format!("group-by field '{group_by}' not in schema")))?;

        let measure_idx = match measure_field {
            None => None,
            Some(name) => {
                let idx = schema.index_of(name).ok_or_else(|| {
                    QueryError::config(format!("aggregate field '{name}' not in schema"))
                })?;
                let data_type = schema.fields()[idx].data_type;
                if !data_type.is_numeric() {
                    return Err(QueryError::config(format!(
                        "aggregate field '{name}' must be numeric, found {data_type}"
                    )));
                }
                Some(idx)
            }
        };

        Ok(Self {
            time_idx,
            key_idx,
            measure_idx,
        })
    }

    /// Project a row onto an [`Event`]. A null measure projects to `None`.
    pub fn project(&self, row: &Row) -> Result<Event, ProjectionSkip> {
        let timestamp = row.values[self.time_idx]
            .as_timestamp()
            .ok_or(ProjectionSkip::NullTime)?;
        let key = row.values[self.key_idx]
            .render()
            .ok_or(ProjectionSkip::NullKey)?;
        let measure = self.measure_idx.and_then(|i| row.values[i].as_f64());
        Ok(Event {
            timestamp,
            key,
            measure,
        })
    }
}
