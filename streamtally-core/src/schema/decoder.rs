use super::*;

/// The outcome of decoding one input unit.
///
/// Valid rows and per-line failures are reported side by side; a malformed
/// line never hides the rows around it.
#[derive(Debug, Default)]
pub struct DecodedUnit {
    pub rows: Vec<Row>,
    pub errors: Vec<DecodeError>,
}

/// Decodes newline-delimited JSON objects against a declared [`Schema`].
///
/// Decoding is a single O(size) pass: there is no schema discovery step.
/// Blank lines are ignored; every other line must be one JSON object.
#[derive(Debug, Clone)]
pub struct JsonLinesDecoder {
    schema: Arc<Schema>,
    policy: SchemaPolicy,
}

impl JsonLinesDecoder {
    pub fn new(schema: Arc<Schema>, policy: SchemaPolicy) -> Self {
        Self { schema, policy }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn policy(&self) -> SchemaPolicy {
        self.policy
    }

    /// Decode every line of `raw`.
    pub fn decode(&self, raw: &[u8]) -> DecodedUnit {
        let mut out = DecodedUnit::default();
        for (idx, line) in raw.split(|b| *b == b'\n').enumerate() {
            let line_no = idx + 1;
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match self.decode_line(line, line_no) {
                Ok(row) => out.rows.push(row),
                Err(err) => out.errors.push(err),
            }
        }
        out
    }

    fn decode_line(&self, line: &[u8], line_no: usize) -> Result<Row, DecodeError> {
        let text = std::str::from_utf8(line)
            .map_err(|e| DecodeError::new(line_no, format!("invalid utf-8: {e}")))?;
        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| DecodeError::new(line_no, format!("invalid json: {e}")))?;
        let serde_json::Value::Object(object) = parsed else {
            return Err(DecodeError::new(line_no, "expected a json object"));
        };

        if self.policy.unknown_fields == UnknownFieldPolicy::Reject {
            if let Some(unknown) = object.keys().find(|k| self.schema.index_of(k).is_none()) {
                return Err(DecodeError::new(
                    line_no,
                    format!("unknown field '{unknown}'"),
                ));
            }
        }

        let mut values = Vec::with_capacity(self.schema.len());
        for field in self.schema.fields() {
            let value = match object.get(&field.name) {
                None | Some(serde_json::Value::Null) => Value::Null,
                Some(json) => self.convert(field, json).map_err(|reason| {
                    DecodeError::new(line_no, format!("field '{}': {reason}", field.name))
                })?,
            };
            if value.is_null() && !field.nullable {
                return Err(DecodeError::new(
                    line_no,
                    format!("missing value for non-nullable field '{}'", field.name),
                ));
            }
            values.push(value);
        }

        Ok(Row {
            schema: Arc::clone(&self.schema),
            values,
        })
    }

    fn convert(&self, field: &Field, json: &serde_json::Value) -> Result<Value, String> {
        use serde_json::Value as Json;

        match (field.data_type, json) {
            (DataType::String, Json::String(s)) => Ok(Value::String(s.clone())),
            (DataType::Boolean, Json::Bool(b)) => Ok(Value::Boolean(*b)),
            (DataType::Int64, Json::Number(n)) => integral(n)
                .map(Value::Int64)
                .ok_or_else(|| format!("expected int64, got {n}")),
            (DataType::Float64, Json::Number(n)) => n
                .as_f64()
                .map(Value::Float64)
                .ok_or_else(|| format!("expected float64, got {n}")),
            (DataType::Timestamp, Json::Number(n)) => {
                numeric_timestamp(n, self.policy.timestamp_unit).map(Value::Timestamp)
            }
            (DataType::Timestamp, Json::String(s)) => parse_timestamp(s).map(Value::Timestamp),
            (expected, other) => Err(format!("expected {expected}, got {}", json_kind(other))),
        }
    }
}

fn integral(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn numeric_timestamp(n: &serde_json::Number, unit: TimestampUnit) -> Result<EventTime, String> {
    let scale: i64 = match unit {
        TimestampUnit::Seconds => 1_000,
        TimestampUnit::Millis => 1,
    };
    if let Some(v) = n.as_i64() {
        return v
            .checked_mul(scale)
            .ok_or_else(|| format!("timestamp {v} out of range"));
    }
    let f = n
        .as_f64()
        .ok_or_else(|| format!("timestamp {n} out of range"))?;
    let millis = (f * scale as f64).round();
    if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
        return Err(format!("timestamp {n} out of range"));
    }
    Ok(millis as i64)
}

/// Parse an RFC 3339 timestamp, or a naive `YYYY-MM-DD HH:MM:SS[.fff]` taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<EventTime, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    Err(format!("unparseable timestamp '{s}'"))
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
