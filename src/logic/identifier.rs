use crate::error::PortfolioError;
use crate::model::ObjectId;

/// Normalise an identifier received at the boundary into its canonical form.
///
/// `kind` names the identifier in the error ("portfolio", "item", "section").
/// Every lookup goes through here first so malformed input is always reported
/// as `InvalidIdentifier` and never as a lookup failure.
pub fn resolve(raw: &str, kind: &'static str) -> Result<ObjectId, PortfolioError> {
    ObjectId::parse_str(raw).map_err(|err| {
        log::debug!("rejected {} id '{}': {}", kind, raw, err);
        PortfolioError::InvalidIdentifier {
            kind,
            value: raw.to_string(),
        }
    })
}
