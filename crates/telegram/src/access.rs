use std::collections::HashSet;

/// User ids allowed to run operator commands.
#[derive(Debug, Clone, Default)]
pub struct Operators {
    ids: HashSet<i64>,
}

impl Operators {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// An empty operator list denies everyone.
    pub fn check(&self, sender_id: Option<i64>) -> Result<(), AccessDenied> {
        let Some(sender_id) = sender_id else {
            return Err(AccessDenied::NoSender);
        };
        if self.ids.contains(&sender_id) {
            Ok(())
        } else {
            Err(AccessDenied::NotOperator)
        }
    }
}

/// Reason an operator command was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    /// Anonymous admins and channel posts carry no user.
    NoSender,
    NotOperator,
}

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSender => write!(f, "message has no sender"),
            Self::NotOperator => write!(f, "sender is not an operator"),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(&[1, 2], Some(1), Ok(()))]
    #[case(&[1, 2], Some(3), Err(AccessDenied::NotOperator))]
    #[case(&[1, 2], None, Err(AccessDenied::NoSender))]
    #[case(&[], Some(1), Err(AccessDenied::NotOperator))]
    fn operator_gating(
        #[case] ids: &[i64],
        #[case] sender: Option<i64>,
        #[case] expected: Result<(), AccessDenied>,
    ) {
        let ops = Operators::new(ids.iter().copied());
        assert_eq!(ops.check(sender), expected);
    }
}
