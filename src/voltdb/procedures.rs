//! Stored-procedure contract between the binding and the `usertable` schema.
//!
//! Procedure names and positional argument order are fixed by the deployed
//! catalog; any change there needs a new version here.

use crate::db::Fields;
use crate::error::DbError;
use crate::voltdb::wire::Param;

pub const FIELD_COUNT: usize = 10;

#[derive(Debug)]
pub struct UserProcedures {
    pub version: u32,
    pub table: &'static str,
    /// `DeleteUser(key)`
    pub delete: &'static str,
    /// `INSERTUSER(key, field0..field9)`
    pub insert: &'static str,
    /// `SelectUser(key)`
    pub select: &'static str,
    /// `UpdateUser(key, field0..field9)`
    pub update: &'static str,
    /// `ScanUsers(startkey, count)`
    pub scan: &'static str,
    pub key_column: &'static str,
    pub fields: [&'static str; FIELD_COUNT],
}

impl UserProcedures {
    pub const V1: UserProcedures = UserProcedures {
        version: 1,
        table: "usertable",
        delete: "DeleteUser",
        insert: "INSERTUSER",
        select: "SelectUser",
        update: "UpdateUser",
        scan: "ScanUsers",
        key_column: "key",
        fields: [
            "field0", "field1", "field2", "field3", "field4", "field5", "field6", "field7",
            "field8", "field9",
        ],
    };

    pub fn key_args(&self, key: &str) -> Vec<Param> {
        vec![Param::from(key)]
    }

    pub fn insert_args(&self, key: &str, values: &Fields) -> Result<Vec<Param>, DbError> {
        self.row_args(key, values)
    }

    pub fn update_args(&self, key: &str, values: &Fields) -> Result<Vec<Param>, DbError> {
        self.row_args(key, values)
    }

    /// Counts above `i32::MAX` are clamped; the procedure takes an INTEGER.
    pub fn scan_args(&self, start_key: &str, count: usize) -> Vec<Param> {
        let count = i32::try_from(count).unwrap_or(i32::MAX);
        vec![Param::from(start_key), Param::Integer(count)]
    }

    /// Key followed by every field in schema order.
    fn row_args(&self, key: &str, values: &Fields) -> Result<Vec<Param>, DbError> {
        let mut args = Vec::with_capacity(FIELD_COUNT + 1);
        args.push(Param::from(key));
        for field in self.fields {
            let value = values.get(field).ok_or_else(|| DbError::MissingField {
                field: field.to_string(),
            })?;
            args.push(Param::String(value.clone()));
        }
        Ok(args)
    }

    pub fn is_key_column(&self, column: &str) -> bool {
        column.eq_ignore_ascii_case(self.key_column)
    }

    /// DDL for a catalog exposing these procedures.
    pub fn ddl(&self) -> String {
        let t = self.table;
        let k = self.key_column;
        let columns: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("    {} VARCHAR(255),\n", f))
            .collect();
        let placeholders = vec!["?"; FIELD_COUNT + 1].join(", ");
        let mut ddl = format!(
            "-- {t} procedures, version {v}\n\
             CREATE TABLE {t}\n(\n    {k} VARCHAR(255) NOT NULL,\n{cols}    PRIMARY KEY ({k})\n);\n\
             PARTITION TABLE {t} ON COLUMN {k};\n\n",
            t = t,
            k = k,
            v = self.version,
            cols = columns.concat(),
        );
        ddl.push_str(&format!(
            "CREATE PROCEDURE {p} PARTITION ON TABLE {t} COLUMN {k} AS\n    DELETE FROM {t} WHERE {k} = ?;\n",
            p = self.delete,
            t = t,
            k = k
        ));
        ddl.push_str(&format!(
            "CREATE PROCEDURE {p} PARTITION ON TABLE {t} COLUMN {k} AS\n    INSERT INTO {t} VALUES ({ph});\n",
            p = self.insert,
            t = t,
            k = k,
            ph = placeholders
        ));
        ddl.push_str(&format!(
            "CREATE PROCEDURE {p} PARTITION ON TABLE {t} COLUMN {k} AS\n    SELECT * FROM {t} WHERE {k} = ?;\n",
            p = self.select,
            t = t,
            k = k
        ));
        // UPSERT keeps the key-first argument order of UpdateUser.
        ddl.push_str(&format!(
            "CREATE PROCEDURE {p} PARTITION ON TABLE {t} COLUMN {k} AS\n    UPSERT INTO {t} VALUES ({ph});\n",
            p = self.update,
            t = t,
            k = k,
            ph = placeholders
        ));
        ddl.push_str(&format!(
            "CREATE PROCEDURE {p} AS\n    SELECT * FROM {t} WHERE {k} >= ? ORDER BY {k} LIMIT ?;\n",
            p = self.scan,
            t = t,
            k = k
        ));
        ddl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voltdb::testing::lettered_fields;

    #[test]
    fn procedure_names_are_stable() {
        let p = &UserProcedures::V1;
        assert_eq!(
            [p.delete, p.insert, p.select, p.update, p.scan],
            ["DeleteUser", "INSERTUSER", "SelectUser", "UpdateUser", "ScanUsers"]
        );
        assert_eq!(p.fields.len(), FIELD_COUNT);
    }

    #[test]
    fn row_arguments_are_key_then_fields_in_order() {
        let args = UserProcedures::V1
            .insert_args("user1", &lettered_fields())
            .unwrap();
        let expected: Vec<Param> = std::iter::once("user1")
            .chain(["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"])
            .map(Param::from)
            .collect();
        assert_eq!(args, expected);
    }

    #[test]
    fn missing_field_is_reported_by_name() {
        let mut fields = lettered_fields();
        fields.remove("field7");
        match UserProcedures::V1.update_args("user1", &fields) {
            Err(DbError::MissingField { field }) => assert_eq!(field, "field7"),
            other => panic!("unexpected {:?}", other),
        }

        // input names are case-sensitive
        let mut shouting = lettered_fields();
        let v = shouting.remove("field0").unwrap();
        shouting.insert("FIELD0".to_string(), v);
        assert!(UserProcedures::V1.insert_args("user1", &shouting).is_err());
    }

    #[test]
    fn scan_count_is_clamped() {
        let args = UserProcedures::V1.scan_args("user5", usize::MAX);
        assert_eq!(args, vec![Param::from("user5"), Param::Integer(i32::MAX)]);
    }

    #[test]
    fn ddl_declares_every_procedure() {
        let p = &UserProcedures::V1;
        let ddl = p.ddl();
        for name in [p.delete, p.insert, p.select, p.update, p.scan] {
            assert!(ddl.contains(&format!("CREATE PROCEDURE {} ", name)), "{}", name);
        }
        assert!(ddl.contains("field9 VARCHAR(255)"));
        assert!(ddl.contains("PRIMARY KEY (key)"));
    }
}
