//! OID reconciler: three-way merge of client-declared OIDs and
//! compiler-inferred types into the OID list returned in
//! PARAMETER_DESCRIPTION.
//!
//! Expressed as explicit index iteration over `0..max(len)` rather than
//! zipping, since the two inputs legitimately differ in length.

use crate::wire::Oid;
use crate::wire::types::{OID_UNSPECIFIED, OID_VOID};

/// For each slot, prefer the client's declared OID unless it's
/// `UNSPECIFIED`/`VOID`, falling back to the compiler's inferred OID.
pub fn reconcile(declared: &[Oid], inferred: &[Oid]) -> Vec<Oid> {
    let len = declared.len().max(inferred.len());
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let client_oid = declared.get(i).copied().unwrap_or(OID_UNSPECIFIED);
        if client_oid != OID_UNSPECIFIED && client_oid != OID_VOID {
            out.push(client_oid);
            continue;
        }
        out.push(inferred.get(i).copied().unwrap_or(OID_UNSPECIFIED));
    }
    out
}
