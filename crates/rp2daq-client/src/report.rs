//! Report record delivered to callers and callbacks

use std::sync::Arc;

use rp2daq_core::ReportDescriptor;

use crate::error::{Error, Result};

/// One decoded device report: the header fields named by the descriptor
/// plus the expanded sample payload when the report carries one.
#[derive(Clone)]
pub struct Report {
    desc: Arc<ReportDescriptor>,
    values: Vec<i128>,
    data: Option<Vec<u16>>,
}

impl Report {
    pub(crate) fn new(desc: Arc<ReportDescriptor>, values: Vec<i128>, data: Option<Vec<u16>>) -> Self {
        debug_assert_eq!(values.len(), desc.fields.len());
        Self { desc, values, data }
    }

    /// Opcode shared with the originating command
    pub fn opcode(&self) -> u8 {
        self.desc.opcode
    }

    /// Name of the originating command
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Header field value by name
    pub fn get(&self, field: &str) -> Option<i128> {
        self.desc.field_index(field).map(|i| self.values[i])
    }

    /// Header field value by name, erroring with the report name
    pub fn require(&self, field: &str) -> Result<i128> {
        self.get(field).ok_or_else(|| Error::MissingReportField {
            report: self.desc.name.clone(),
            field: field.to_string(),
        })
    }

    /// Header fields in wire order
    pub fn fields(&self) -> impl Iterator<Item = (&str, i128)> {
        self.desc
            .fields
            .iter()
            .zip(&self.values)
            .map(|(f, &v)| (f.name.as_str(), v))
    }

    /// Expanded sample payload, if the report carries one
    pub fn data(&self) -> Option<&[u16]> {
        self.data.as_deref()
    }

    /// Consume the report, taking the sample payload
    pub fn into_data(self) -> Option<Vec<u16>> {
        self.data
    }
}

impl std::fmt::Debug for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Report");
        s.field("name", &self.desc.name);
        for (name, value) in self.fields() {
            s.field(name, &value);
        }
        if let Some(data) = &self.data {
            s.field("data_len", &data.len());
        }
        s.finish()
    }
}
