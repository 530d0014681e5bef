pub mod factors;
pub mod homography;
pub mod pnp;

pub use homography::{apply_homography, homography_from_4pt};
pub use pnp::{solve_pnp, solve_pnp_weighted, PnpError};
