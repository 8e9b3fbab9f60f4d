use crate::error::DbError;

/// Column type tags as they appear on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Null,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    String,
    Timestamp,
    Decimal,
    Varbinary,
}

impl ColumnType {
    pub fn from_tag(tag: i8) -> Result<ColumnType, DbError> {
        let ty = match tag {
            1 => ColumnType::Null,
            3 => ColumnType::TinyInt,
            4 => ColumnType::SmallInt,
            5 => ColumnType::Integer,
            6 => ColumnType::BigInt,
            8 => ColumnType::Float,
            9 => ColumnType::String,
            11 => ColumnType::Timestamp,
            22 => ColumnType::Decimal,
            25 => ColumnType::Varbinary,
            other => return Err(DbError::protocol(format!("unknown column type {}", other))),
        };
        Ok(ty)
    }

    pub fn tag(&self) -> i8 {
        match self {
            ColumnType::Null => 1,
            ColumnType::TinyInt => 3,
            ColumnType::SmallInt => 4,
            ColumnType::Integer => 5,
            ColumnType::BigInt => 6,
            ColumnType::Float => 8,
            ColumnType::String => 9,
            ColumnType::Timestamp => 11,
            ColumnType::Decimal => 22,
            ColumnType::Varbinary => 25,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Float(f64),
    String(String),
    Varbinary(Vec<u8>),
    /// Microseconds since the epoch.
    Timestamp(i64),
    /// Raw 16-byte two's complement, scale 12.
    Decimal([u8; 16]),
}

impl Value {
    /// String rendering of the value; `None` for SQL NULL.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::TinyInt(v) => Some(v.to_string()),
            Value::SmallInt(v) => Some(v.to_string()),
            Value::Integer(v) => Some(v.to_string()),
            Value::BigInt(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::String(v) => Some(v.clone()),
            Value::Varbinary(v) => Some(String::from_utf8_lossy(v).into_owned()),
            Value::Timestamp(v) => Some(v.to_string()),
            Value::Decimal(v) => Some(i128::from_be_bytes(*v).to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// One result set returned by a procedure.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VoltTable {
    pub status: i8,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl VoltTable {
    pub fn new(columns: Vec<Column>) -> Self {
        VoltTable {
            status: 0,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<Value>) -> Result<(), DbError> {
        if row.len() != self.columns.len() {
            return Err(DbError::protocol(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[cfg(test)]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of the column whose name matches `name` ignoring ASCII case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            table: self,
            values,
        })
    }

    pub fn row(&self, idx: usize) -> Option<Row<'_>> {
        self.rows.get(idx).map(|values| Row {
            table: self,
            values,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Row<'a> {
    table: &'a VoltTable,
    values: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, idx: usize) -> Option<&'a Value> {
        self.values.get(idx)
    }

    pub fn get_string(&self, idx: usize) -> Option<String> {
        self.get(idx).and_then(Value::as_string)
    }

    pub fn get_string_by_name(&self, name: &str) -> Option<String> {
        self.table
            .column_index(name)
            .and_then(|idx| self.get_string(idx))
    }

    /// Pairs of column name and value in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        let (table, values) = (self.table, self.values);
        table
            .columns
            .iter()
            .zip(values.iter())
            .map(|(c, v)| (c.name.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> VoltTable {
        let mut table = VoltTable::new(vec![
            Column {
                name: "KEY".into(),
                column_type: ColumnType::String,
            },
            Column {
                name: "FIELD0".into(),
                column_type: ColumnType::String,
            },
            Column {
                name: "VISITS".into(),
                column_type: ColumnType::BigInt,
            },
        ]);
        table
            .add_row(vec![
                Value::String("user1".into()),
                Value::String("a".into()),
                Value::BigInt(7),
            ])
            .unwrap();
        table
            .add_row(vec![Value::String("user2".into()), Value::Null, Value::Null])
            .unwrap();
        table
    }

    #[test]
    fn column_lookup_ignores_case() {
        let table = users();
        assert_eq!(table.column_index("field0"), Some(1));
        assert_eq!(table.column_index("Key"), Some(0));
        assert_eq!(table.column_index("field1"), None);

        let row = table.row(0).unwrap();
        assert_eq!(row.get_string_by_name("field0").as_deref(), Some("a"));
        assert_eq!(row.get_string(2).as_deref(), Some("7"));
    }

    #[test]
    fn null_values_have_no_string() {
        let table = users();
        let row = table.row(1).unwrap();
        assert_eq!(row.get_string_by_name("FIELD0"), None);
        assert!(table.row(2).is_none());
    }

    #[test]
    fn rejects_short_rows() {
        let mut table = users();
        assert!(table.add_row(vec![Value::Null]).is_err());
        assert_eq!(table.row_count(), 2);
    }
}
