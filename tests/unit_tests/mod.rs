mod boundary;
mod convection;
