#![allow(dead_code)]

use ipx_config_lib::serial::ScriptedPort;

/// Modbus RTU CRC, low byte first on the wire
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

pub fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Reply to a write single register request: the request echoed back.
pub fn write_echo(alias: u8, register: u16, value: u16) -> Vec<u8> {
    let mut frame = vec![alias, 0x06];
    frame.extend_from_slice(&register.to_be_bytes());
    frame.extend_from_slice(&value.to_be_bytes());
    with_crc(frame)
}

pub fn read_reply(alias: u8, registers: &[u16]) -> Vec<u8> {
    let mut frame = vec![alias, 0x03, (registers.len() * 2) as u8];
    for register in registers {
        frame.extend_from_slice(&register.to_be_bytes());
    }
    with_crc(frame)
}

pub fn float_regs(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

/// Queue the five replies of one datalogger measurement.
pub fn script_measurement(
    port: &ScriptedPort,
    alias: u8,
    status: u16,
    distance: f32,
    temperature: f32,
    voltage: f32,
) {
    port.reply_bytes_next(vec![write_echo(alias, 0x0063, 0xFFFF)]);
    port.reply_bytes_next(vec![read_reply(alias, &[status])]);
    port.reply_bytes_next(vec![read_reply(alias, &float_regs(distance))]);
    port.reply_bytes_next(vec![read_reply(alias, &float_regs(temperature))]);
    port.reply_bytes_next(vec![read_reply(alias, &float_regs(voltage))]);
}

/// Answer a setter with its confirmation phrase.
pub fn confirm(port: &ScriptedPort, command: &str, phrase: &str) {
    port.reply_once(command, &[format!("{} ok\n", phrase).as_str()]);
}
