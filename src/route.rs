//! Route definitions: reusable ordered lists of approval steps
use crate::error::{Result, ValidationError};
use crate::types::UserId;
use crate::utils::{ROUTE_HRP, ROUTE_LINE_HRP, new_id};

pub const DEFAULT_IDX: u32 = 1;

/// Who a route line belongs to: a shared route, or a single process that
/// carries its own copy.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum RouteOwner {
    #[n(0)]
    Route(#[n(0)] String),
    #[n(1)]
    Process(#[n(0)] String),
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct RouteLine {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub owner: RouteOwner,
    #[n(2)]
    pub step_index: u32,
    #[n(3)]
    pub approvers: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct RouteRef {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub is_default: bool,
    #[n(3)]
    pub lines: Vec<RouteLine>,
}

impl RouteLine {
    pub fn new(
        owner: RouteOwner,
        step_index: u32,
        approvers: Vec<UserId>,
    ) -> Result<Self> {
        let line = Self {
            id: new_id(ROUTE_LINE_HRP)?,
            owner,
            step_index,
            approvers,
        };
        line.validate()?;
        Ok(line)
    }
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.step_index < 1 {
            return Err(ValidationError::InvalidStepIndex(self.step_index));
        }
        if self.approvers.is_empty() {
            return Err(ValidationError::NoApprovers(self.step_index));
        }
        Ok(())
    }
    /// Deep copy under a new owner with a fresh identity. The approver set is
    /// cloned, so the copy never aliases the original.
    pub fn copy_for(&self, owner: RouteOwner) -> Result<Self> {
        Ok(Self {
            id: new_id(ROUTE_LINE_HRP)?,
            owner,
            step_index: self.step_index,
            approvers: self.approvers.clone(),
        })
    }
}

impl RouteRef {
    /// Builds a route from `(step_index, approvers)` pairs.
    pub fn new(
        name: impl Into<String>,
        is_default: bool,
        steps: Vec<(u32, Vec<UserId>)>,
    ) -> Result<Self> {
        let id = new_id(ROUTE_HRP)?;
        let lines = steps
            .into_iter()
            .map(|(idx, approvers)| RouteLine::new(RouteOwner::Route(id.clone()), idx, approvers))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            name: name.into(),
            is_default,
            lines,
        })
    }
    /// Copies every line of this route into a process-owned route.
    pub fn copy_into_process(&self, process_id: &str) -> Result<Vec<RouteLine>> {
        self.lines
            .iter()
            .map(|line| line.copy_for(RouteOwner::Process(process_id.to_string())))
            .collect()
    }
}
