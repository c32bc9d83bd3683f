pub mod linear_kf;
