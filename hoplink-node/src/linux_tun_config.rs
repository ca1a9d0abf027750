use anyhow::{bail, Context, Result};
use std::net::Ipv6Addr;
use std::process::Command;

fn run(cmd: &str, args: &[String]) -> Result<String> {
    let out = Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("failed to spawn {cmd}"))?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);

    if !out.status.success() {
        bail!("{cmd} failed ({}): {stdout}{stderr}", out.status);
    }

    Ok(format!("{stdout}{stderr}"))
}

fn ip(args: &[&str]) -> Result<String> {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    run("ip", &args)
}

/// Bring `ifname` up with the given MTU and IPv6 address.
pub fn configure_linux_tun(
    ifname: &str,
    mtu: usize,
    ipv6: Ipv6Addr,
    prefix: u8,
    log: &dyn Fn(String),
) -> Result<()> {
    if prefix > 128 {
        bail!("invalid IPv6 prefix length: {prefix}");
    }

    ip(&["link", "set", "dev", ifname, "up"]).with_context(|| {
        format!("failed to bring interface '{ifname}' up (ip link set dev ... up)")
    })?;

    // tun-rs already applied the MTU; a failure here only leaves it as built.
    if let Err(e) = ip(&["link", "set", "dev", ifname, "mtu", &mtu.to_string()]) {
        log(format!("Warning: failed to set MTU via ip: {e}"));
    }

    ip(&[
        "-6",
        "addr",
        "replace",
        &format!("{ipv6}/{prefix}"),
        "dev",
        ifname,
    ])
    .with_context(|| format!("failed to set IPv6 address on '{ifname}'"))?;

    log(format!("Configured '{ifname}' IPv6={ipv6}/{prefix} mtu={mtu}"));
    Ok(())
}
