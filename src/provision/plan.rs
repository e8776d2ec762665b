use std::fmt;

/// Kind of cloud resource an action touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Address,
    Firewall,
    Instance,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => write!(f, "address"),
            Self::Firewall => write!(f, "firewall rule"),
            Self::Instance => write!(f, "instance"),
        }
    }
}

/// Type of action to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Create,
    Update,
    NoOp,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::NoOp => write!(f, "no-op"),
        }
    }
}

/// One planned change to one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ResourceKind,
    pub name: String,
    pub action_type: ActionType,
    /// Human-readable differences found between declared and
    /// observed state. Empty for creates and no-ops.
    pub drift: Vec<String>,
}

impl Action {
    #[must_use]
    pub fn new(kind: ResourceKind, name: &str, action_type: ActionType) -> Self {
        Self {
            kind,
            name: name.to_string(),
            action_type,
            drift: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_drift(mut self, drift: Vec<String>) -> Self {
        self.drift = drift;
        self
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.action_type {
            ActionType::Create => "+",
            ActionType::Update => "~",
            ActionType::NoOp => " ",
        };
        write!(f, "{marker} {} '{}' ({})", self.kind, self.name, self.action_type)?;
        for d in &self.drift {
            write!(f, "\n      {d}")?;
        }
        Ok(())
    }
}

/// Ordered actions reconciling observed state with the declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    #[must_use]
    pub const fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions
            .iter()
            .any(|a| a.action_type != ActionType::NoOp)
    }

    #[must_use]
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    #[must_use]
    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<&Action> {
        self.actions
            .iter()
            .find(|a| a.kind == kind && a.name == name)
    }

    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub no_change: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} unchanged",
            self.create, self.update, self.no_change
        )
    }
}
