use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Every request parameter the service recognises.
///
/// Names outside this set, other than `$`-prefixed named arguments and
/// `_`-prefixed comments, are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub(crate) enum Parameter {
    Statement,
    Prepared,
    EncodedPlan,
    Creds,
    Args,
    Timeout,
    ScanConsistency,
    ScanWait,
    ScanVector,
    ScanVectors,
    MaxParallelism,
    ScanCap,
    PipelineCap,
    PipelineBatch,
    Readonly,
    Metrics,
    Namespace,
    Format,
    Encoding,
    Compression,
    Signature,
    Pretty,
    ClientContextId,
    Profile,
    Controls,
    #[strum(serialize = "n1ql_feat_ctrl")]
    N1qlFeatCtrl,
    MaxIndexApi,
    AutoPrepare,
    AutoExecute,
    UseFts,
    Txid,
}

impl Parameter {
    pub(crate) fn name(self) -> &'static str {
        self.into()
    }
}

/// How a field name in the payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldName<'a> {
    Known(Parameter),
    Named(&'a str),
    Ignored,
    Unknown(&'a str),
}

impl<'a> FieldName<'a> {
    pub(crate) fn classify(name: &'a str) -> Self {
        if name.is_empty() || name.starts_with('_') {
            return Self::Ignored;
        }
        if let Some(named) = name.strip_prefix('$') {
            return Self::Named(named);
        }
        name.parse::<Parameter>()
            .map_or(Self::Unknown(name), Self::Known)
    }

    pub(crate) const fn is_recognised(self) -> bool {
        matches!(self, Self::Known(_) | Self::Named(_))
    }
}
