//! Textual rendering of a compiled schema.
//!
//! The output is compared byte-for-byte in tests and diffed between
//! deployments, so formatting must not depend on anything but the schema.

use std::fmt;

use super::types::{AuthorizationSchema, Definition};

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "definition {} {{}}", self.name);
        }

        writeln!(f, "definition {} {{", self.name)?;
        for relation in &self.relations {
            let types: Vec<String> = relation.types.iter().map(ToString::to_string).collect();
            writeln!(f, "\trelation {}: {}", relation.name, types.join(" | "))?;
        }
        for permission in &self.permissions {
            let terms: Vec<String> = permission.union.iter().map(ToString::to_string).collect();
            writeln!(f, "\tpermission {} = {}", permission.name, terms.join(" + "))?;
        }
        f.write_str("}")
    }
}

impl fmt::Display for AuthorizationSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, definition) in self.definitions.iter().enumerate() {
            if idx > 0 {
                f.write_str("\n\n")?;
            }
            write!(f, "{definition}")?;
        }
        Ok(())
    }
}
