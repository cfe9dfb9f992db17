/*! Session liveness for a WAN accelerator data plane.

The accelerator tracks every TCP flow passing through it in a shared
session [table](session/struct.Table.html). Endpoints that go silent
would otherwise pin their entries forever, so a background
[sweeper](sweep/struct.Sweeper.html) periodically walks the table and

  * leaves recently active sessions alone,
  * nudges idle sessions with a pair of hand-built TCP keepalive probes,
    one toward each endpoint, sent through a raw IPv4 socket,
  * evicts sessions that stayed idle for more sweeps than the dead threshold.

The crate is organized in layers, leaves first:

  * [wire](wire/index.html) builds and parses the IPv4 and TCP headers of
    a keepalive probe, including the checksums and the accelerator-id
    TCP option that lets an accelerator recognize its own probes;
  * [phy](phy/index.html) transmits finished datagrams, either through a
    [RawSocket](phy/struct.RawSocket.html) or an in-memory
    [Loopback](phy/struct.Loopback.html);
  * [session](session/index.html) holds the bucketed session table;
  * [sweep](sweep/index.html) classifies and evicts sessions on a timer,
    stopping when the injected [service signal](service/index.html) says so.

# Logging

Every diagnostic goes through the [`log`](https://docs.rs/log) facade.
No logger is installed by this crate.
*/

#![deny(unsafe_op_in_unsafe_fn)]

#[macro_use]
mod macros;
mod parsers;

pub mod config;
pub mod phy;
pub mod service;
pub mod session;
pub mod sweep;
pub mod time;
pub mod wire;
