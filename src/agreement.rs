use crate::error::Result;
use crate::types::RecordRef;
use crate::utils::{AGREEMENT_HRP, new_id};

/// Binds one business record to its history of approval processes.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Agreement {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub related_record: RecordRef,
    #[n(2)]
    pub lines_attribute: Option<String>, // sub-collection on the record that yields per-line approvals
    #[n(3)]
    pub processes: Vec<String>, // process ids, oldest first
}

impl Agreement {
    pub fn new(related_record: RecordRef, lines_attribute: Option<String>) -> Result<Self> {
        Ok(Self {
            id: new_id(AGREEMENT_HRP)?,
            related_record,
            lines_attribute: lines_attribute.filter(|name| !name.is_empty()),
            processes: vec![],
        })
    }
    /// Id of the most recently created process, if any.
    pub fn latest_process(&self) -> Option<&str> {
        self.processes.last().map(String::as_str)
    }
    pub fn push_process(&mut self, process_id: String) {
        self.processes.push(process_id);
    }
    pub fn remove_process(&mut self, process_id: &str) -> bool {
        let before = self.processes.len();
        self.processes.retain(|id| id != process_id);
        before != self.processes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lines_attribute_means_record_level() {
        let agreement = Agreement::new(RecordRef::new("budget", "1"), Some(String::new())).unwrap();
        assert_eq!(agreement.lines_attribute, None);
    }

    #[test]
    fn latest_process_is_last_pushed() {
        let mut agreement = Agreement::new(RecordRef::new("budget", "1"), None).unwrap();
        assert_eq!(agreement.latest_process(), None);

        agreement.push_process("proc_a".into());
        agreement.push_process("proc_b".into());
        assert_eq!(agreement.latest_process(), Some("proc_b"));

        assert!(agreement.remove_process("proc_b"));
        assert_eq!(agreement.latest_process(), Some("proc_a"));
        assert!(!agreement.remove_process("proc_b"));
    }
}
